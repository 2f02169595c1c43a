use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use soma_core::EnergyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,
    pub user_name: String,
    pub workspace_path: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "Soma".to_string(),
            user_name: String::new(),
            workspace_path: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub store_path: String,
    /// IANA timezone used for daily/weekly/monthly recurrence unless a
    /// schedule specifies its own.
    pub default_timezone: String,
    /// How many due schedules a single orchestrator tick will fire at most.
    pub max_due_per_tick: usize,
    /// Maximum number of live schedules a single owner (plugin or `core`)
    /// may hold at once. `None` means unenforced.
    pub max_schedules_per_owner: Option<usize>,
    /// How many recent `fireId`s each schedule retains for dedup purposes.
    pub dedupe_retention: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store_path: "data/schedules.json".to_string(),
            default_timezone: "UTC".to_string(),
            max_due_per_tick: 50,
            max_schedules_per_owner: None,
            dedupe_retention: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Append-only event log backing the memory provider, mirrored on the
    /// same atomic-rename discipline as the schedule store.
    pub store_path: String,
    /// Minimum decay score (§4.9) a memory entry must retain before a
    /// pruning pass drops it.
    pub prune_min_score: f64,
    pub max_history_messages: usize,
    /// Number of turns a conversation accumulates before compaction runs.
    pub compact_after: usize,
    pub max_retained_messages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store_path: "data/memory.jsonl".to_string(),
            prune_min_score: 0.05,
            max_history_messages: 20,
            compact_after: 40,
            max_retained_messages: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Width of each rolling bucket.
    pub bucket_window_secs: u64,
    /// Buckets retained per `(type, source)` key before the oldest is pruned.
    pub max_buckets_per_key: usize,
    pub prune_interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_window_secs: 60,
            max_buckets_per_key: 120,
            prune_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// How long a sensory source can go silent before `sudden_silence` fires.
    pub sudden_silence_threshold_secs: u64,
    /// How long an acknowledged pattern is suppressed from re-firing.
    pub acknowledgment_suppression_secs: u64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            sudden_silence_threshold_secs: 3600,
            acknowledgment_suppression_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Base wake threshold before the energy-derived multiplier is applied.
    pub base_threshold: f64,
    /// Priority at or above which a signal wakes cognition unconditionally.
    pub override_priority: String,
    pub cooldown_secs: u64,
    /// Below this energy level, only CRITICAL-priority signals may wake
    /// cognition (§4.4 step 3).
    pub energy_wake_floor: f64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.35,
            override_priority: "critical".to_string(),
            cooldown_secs: 30,
            energy_wake_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub max_calls_per_turn: u32,
    /// Per-tool overrides of `max_calls_per_turn`, keyed by tool name.
    pub per_tool_limits: HashMap<String, u32>,
    /// When true, `ToolRegistry::cards()` omits full JSON schemas; callers
    /// fetch them on demand via `full_schema(name)`.
    pub lazy_schema: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            max_calls_per_turn: 8,
            per_tool_limits: HashMap::new(),
            lazy_schema: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_tool_calls: u32,
    pub timeout_ms: u64,
    pub max_thought_depth: u32,
    /// Abort the loop after this many consecutive identical tool calls.
    pub identical_call_limit: u32,
    /// Abort the loop after this many consecutive failures of the same tool.
    pub failed_call_limit: u32,
    /// Window within which two thoughts are considered duplicates (§4.6).
    pub thought_dedupe_window_secs: u64,
    /// Whether a natural-language (non-JSON) completion is accepted as a
    /// valid `respond` terminal.
    pub allow_plain_text: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_tool_calls: 20,
            timeout_ms: 120_000,
            max_thought_depth: 2,
            identical_call_limit: 2,
            failed_call_limit: 2,
            thought_dedupe_window_secs: 900,
            allow_plain_text: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldPolicyConfig {
    /// Field names the `remember` tool may never write without explicit
    /// approval (e.g. `ssn`, `password`).
    pub restricted_fields: Vec<String>,
    pub require_approval_for_restricted: bool,
}

impl Default for FieldPolicyConfig {
    fn default() -> Self {
        Self {
            restricted_fields: Vec::new(),
            require_approval_for_restricted: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Path to the container runtime CLI binary. Overridden at runtime by the
    /// `SOMA_CONTAINER_RUNTIME` environment variable when set.
    pub runtime_binary: String,
    pub image: String,
    pub lifetime_cap_secs: u64,
    pub workspace_root: String,
    /// `"none"`, `"dns-only"`, or `"allow"`.
    pub network_policy: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime_binary: "docker".to_string(),
            image: "soma-sandbox:latest".to_string(),
            lifetime_cap_secs: 600,
            workspace_root: "data/containers".to_string(),
            network_policy: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub energy: EnergyConfig,
    pub memory: MemoryConfig,
    pub scheduler: SchedulerConfig,
    pub aggregation: AggregationConfig,
    pub pattern: PatternConfig,
    pub wake: WakeConfig,
    pub tools: ToolConfig,
    pub agent_loop: LoopConfig,
    pub field_policy: FieldPolicyConfig,
    pub container: ContainerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("SOMA_CONTAINER_RUNTIME") {
            if !value.is_empty() {
                config.container.runtime_binary = value;
            }
        }
        if let Ok(value) = env::var("SOMA_DEFAULT_TIMEZONE") {
            if !value.is_empty() {
                config.scheduler.default_timezone = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = AppConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.tools.max_calls_per_turn, config.tools.max_calls_per_turn);
    }

    #[test]
    fn load_from_missing_path_falls_back_to_default() {
        let config = AppConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.identity.name, "Soma");
    }

    #[test]
    fn save_then_load_preserves_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.identity.name = "Test Agent".to_string();
        config.tools.per_tool_limits.insert("web_search".to_string(), 2);
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.identity.name, "Test Agent");
        assert_eq!(loaded.tools.per_tool_limits.get("web_search"), Some(&2));
    }

    #[test]
    fn env_override_applies_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        AppConfig::default().save_to(&path).unwrap();

        unsafe {
            env::set_var("SOMA_CONTAINER_RUNTIME", "podman");
        }
        let config = AppConfig::load_from(&path).unwrap();
        unsafe {
            env::remove_var("SOMA_CONTAINER_RUNTIME");
        }
        assert_eq!(config.container.runtime_binary, "podman");
    }
}
