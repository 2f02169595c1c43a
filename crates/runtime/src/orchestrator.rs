//! The core loop orchestrator (C13, §4.10): owns every per-tick
//! collaborator and drives the tick sequence the design settled on —
//! drain tick energy, collect due and incoming signals, aggregate and
//! pattern-detect, ask for a wake decision, run cognition if woken,
//! compile and apply intents, recharge, and trace.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use soma_agent::{compile_intents, AbortFlag, AgenticLoop, Clock, ConversationStatus, Intent, IntentContext, ImmediateIntentSink};
use soma_config::AppConfig;
use soma_core::{DrainKind, Energy, Metrics, Priority, Signal, SignalData, SignalKind};
use soma_llm::LlmProvider;
use soma_memory::conversation::Compactor;
use soma_memory::{ConversationManager, MemoryProvider, MessageRole};
use soma_prompt::{build_prompt, PromptInputs};
use soma_thinker::{PatternDetector, PermissiveValidator, PluginEventValidator, SignalAggregator, WakeDecision, WakeEngine, DEFAULT_CONDITION_KEY, SUDDEN_SILENCE_PATTERN_ID};
use soma_tools::ports::{AgentStatePort, MemoryPort, SchedulerPort, UserModelPort};
use soma_tools::{default_registry, FieldPolicyTable, ToolContext, ToolRegistry};

use crate::ports::{AgentStateAdapter, LlmCompactor, MemoryAdapter, SchedulerAdapter, UserModelAdapter};
use crate::scheduler::{Scheduler, SchedulerLimits};
use crate::schedule_store::ScheduleStore;

/// A message the loop decided to deliver, queued for whatever channel
/// adapter the host application wires up (Non-goal here, §4 of the design
/// notes — channel adapters are out of scope).
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub recipient: String,
    pub text: String,
    pub status: ConversationStatus,
    pub confidence: f64,
    pub at: DateTime<Utc>,
}

/// A signal deferred by a `Terminal::Defer` (§4.6, §4.7): re-injected as a
/// tick's incoming signal once `defer_until` has passed.
#[derive(Debug, Clone)]
struct DeferredSignal {
    signal_type: String,
    reason: String,
    defer_until: DateTime<Utc>,
}

/// Summary of what one `tick()` call did, returned for logging/testing —
/// not itself part of the persisted state.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub signals_processed: usize,
    pub woke: bool,
    pub wake_reason: Option<String>,
    pub intents_applied: usize,
}

pub struct Orchestrator {
    identity_name: String,
    schedule_owner: String,
    config: AppConfig,
    clock: Arc<dyn Clock>,

    energy: Mutex<Energy>,
    scheduler: Arc<AsyncMutex<Scheduler>>,
    schedule_store: ScheduleStore,
    aggregator: Mutex<SignalAggregator>,
    pattern_detector: Mutex<PatternDetector>,
    wake_engine: WakeEngine,
    plugin_validator: Arc<dyn PluginEventValidator>,

    registry: Arc<ToolRegistry>,
    agentic_loop: AgenticLoop,

    memory: Arc<AsyncMutex<MemoryProvider>>,
    conversation: Arc<AsyncMutex<ConversationManager>>,
    compactor: Arc<dyn Compactor>,

    agent_state_port: Arc<AgentStateAdapter>,
    user_model_port: Arc<UserModelAdapter>,
    memory_port: Arc<MemoryAdapter>,
    scheduler_port: Arc<SchedulerAdapter>,

    pending_signals: Mutex<Vec<Signal>>,
    deferred: Mutex<Vec<DeferredSignal>>,
    outbound: Arc<Mutex<VecDeque<OutboundMessage>>>,
}

impl Orchestrator {
    pub async fn new(config: AppConfig, llm: Arc<dyn LlmProvider>, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let identity_name = config.identity.name.clone();
        let schedule_owner = "core".to_string();

        let energy = Energy::new(config.energy.clone());

        let schedule_store = ScheduleStore::new(&config.scheduler.store_path);
        let limits = SchedulerLimits { max_schedules_per_owner: config.scheduler.max_schedules_per_owner, dedupe_retention: config.scheduler.dedupe_retention };
        let persisted = schedule_store.load().await?;
        let scheduler = Arc::new(AsyncMutex::new(Scheduler::from_entries(persisted, limits)));

        let memory = Arc::new(AsyncMutex::new(MemoryProvider::with_event_log(&config.memory.store_path).await?));
        let conversation = Arc::new(AsyncMutex::new(ConversationManager::new(config.memory.max_retained_messages, config.memory.compact_after)));
        let compactor: Arc<dyn Compactor> = Arc::new(LlmCompactor::new(llm.clone()));

        let agent_state = Arc::new(AsyncMutex::new(serde_json::json!({})));
        let agent_state_port = Arc::new(AgentStateAdapter::new(agent_state, memory.clone(), clock.clone()));
        let user_model_port = Arc::new(UserModelAdapter::new(memory.clone()));
        let memory_port = Arc::new(MemoryAdapter::new(memory.clone(), clock.clone()));
        let scheduler_port = Arc::new(SchedulerAdapter::new(scheduler.clone(), clock.clone()));

        let registry = default_registry(
            config.tools.lazy_schema,
            identity_name.clone(),
            schedule_owner.clone(),
            field_policy_table(&config),
            config.tools.max_calls_per_turn,
            config.tools.per_tool_limits.clone(),
        );
        let agentic_loop = AgenticLoop::new(registry.clone(), llm, config.agent_loop.clone(), clock.clone());

        Ok(Self {
            identity_name,
            schedule_owner,
            config,
            clock,
            energy: Mutex::new(energy),
            scheduler,
            schedule_store,
            aggregator: Mutex::new(SignalAggregator::new()),
            pattern_detector: Mutex::new(PatternDetector::new(config.pattern.clone())),
            wake_engine: WakeEngine::new(config_wake(&config)),
            plugin_validator: Arc::new(PermissiveValidator),
            registry,
            agentic_loop,
            memory,
            conversation,
            compactor,
            agent_state_port,
            user_model_port,
            memory_port,
            scheduler_port,
            pending_signals: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            outbound: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    /// Swap in a host-supplied plugin-event schema validator (§4.4): by
    /// default every plugin event is accepted, since the concrete plugin
    /// schema registry is outside the core's scope (§1 Non-goals).
    pub fn set_plugin_validator(&mut self, validator: Arc<dyn PluginEventValidator>) {
        self.plugin_validator = validator;
    }

    /// Queue an externally originated signal (a channel message, a plugin
    /// event) for processing on the next tick.
    pub fn ingest(&self, signal: Signal) {
        self.pending_signals.lock().unwrap().push(signal);
    }

    /// Drain every message the loop has queued for delivery since the last
    /// call. The host application owns actually sending these.
    pub fn drain_outbound(&self) -> Vec<OutboundMessage> {
        self.outbound.lock().unwrap().drain(..).collect()
    }

    /// Current energy scalar, for host-process status reporting.
    pub fn energy_value(&self) -> f64 {
        self.energy.lock().unwrap().value()
    }

    /// Snapshot of every live schedule, for a CLI maintenance subcommand.
    pub async fn schedule_snapshot(&self) -> Vec<crate::scheduler::ScheduleEntry> {
        self.scheduler.lock().await.snapshot()
    }

    /// Count of persisted memory entries, for a CLI status subcommand.
    pub async fn memory_entry_count(&self) -> usize {
        self.memory.lock().await.all().len()
    }

    /// Runs exactly one tick to completion (§4.10).
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> anyhow::Result<TickReport> {
        let now = self.clock.now();
        let tick_id = Uuid::new_v4();

        self.energy.lock().unwrap().drain(DrainKind::Tick);

        let mut tick_signals = self.collect_due_schedules(now).await?;
        tick_signals.extend(self.collect_due_deferrals(now));
        tick_signals.extend(self.pending_signals.lock().unwrap().drain(..));

        tick_signals = soma_thinker::filter_valid_plugin_events(tick_signals, self.plugin_validator.as_ref());

        self.run_aggregation_and_pattern_detection(&mut tick_signals, now);

        let energy_value = self.energy.lock().unwrap().value();
        let wake_threshold = self.energy.lock().unwrap().calculate_wake_threshold(self.config.wake.base_threshold);
        let decision = self.wake_engine.decide(&tick_signals, energy_value, wake_threshold);

        let mut intents_applied = 0usize;
        if decision.should_wake {
            if let Some(trigger) = pick_trigger(&tick_signals, &decision) {
                intents_applied = self.run_cognition(&trigger, tick_id, now).await?;
            }
        }

        let local_hour = self.local_hour(now);
        self.energy.lock().unwrap().tick_recharge(local_hour);

        let report = TickReport {
            tick_id,
            signals_processed: tick_signals.len(),
            woke: decision.should_wake,
            wake_reason: decision.reason.clone(),
            intents_applied,
        };
        tracing::info!(
            tick_id = %report.tick_id,
            signals = report.signals_processed,
            woke = report.woke,
            reason = report.wake_reason.as_deref().unwrap_or(""),
            intents = report.intents_applied,
            energy = energy_value,
            "tick complete",
        );
        Ok(report)
    }

    async fn collect_due_schedules(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Signal>> {
        let mut scheduler = self.scheduler.lock().await;
        let due = scheduler.check_due(now, self.config.scheduler.max_due_per_tick);
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let mut signals = Vec::with_capacity(due.len());
        for (entry, fire_id) in &due {
            if let Err(e) = scheduler.mark_fired(entry.id, fire_id, now) {
                tracing::warn!(error = %e, schedule_id = %entry.id, "failed to mark schedule as fired");
                continue;
            }
            signals.push(
                Signal::new(SignalKind::PluginEvent, entry.owner.clone(), Priority::Normal, Metrics::new(1.0), now)
                    .with_data(SignalData::PluginEvent { plugin_id: entry.owner.clone(), payload: entry.data.clone() }),
            );
        }

        let snapshot = scheduler.snapshot();
        drop(scheduler);
        if let Err(e) = self.schedule_store.save(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist schedule store after firing due schedules");
        }

        Ok(signals)
    }

    fn collect_due_deferrals(&self, now: DateTime<Utc>) -> Vec<Signal> {
        let mut deferred = self.deferred.lock().unwrap();
        let (due, still_waiting): (Vec<_>, Vec<_>) = deferred.drain(..).partition(|d| d.defer_until <= now);
        *deferred = still_waiting;
        due.into_iter()
            .map(|d| {
                let kind = signal_kind_for_deferral(&d.signal_type);
                Signal::new(kind, "deferral_store", Priority::Normal, Metrics::new(1.0), now)
                    .with_data(SignalData::PluginEvent { plugin_id: "core.defer".to_string(), payload: serde_json::json!({"signal_type": d.signal_type, "reason": d.reason}) })
            })
            .collect()
    }

    fn run_aggregation_and_pattern_detection(&self, tick_signals: &mut Vec<Signal>, now: DateTime<Utc>) {
        {
            let mut aggregator = self.aggregator.lock().unwrap();
            aggregator.add_all(tick_signals);
            aggregator.prune(now);
        }

        let mut detector = self.pattern_detector.lock().unwrap();
        if let Some(matched) = detector.detect(tick_signals, now) {
            let confidence = matched.confidence;
            let signal = matched.into_signal("pattern_detector", now);
            detector.acknowledge(SUDDEN_SILENCE_PATTERN_ID, DEFAULT_CONDITION_KEY, confidence, now);
            tick_signals.push(signal);
        }
        detector.sweep_acknowledgments(now);
    }

    async fn run_cognition(&self, trigger: &Signal, tick_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let recipient = recipient_of(trigger);

        let ctx = ToolContext {
            agent_state: Some(self.agent_state_port.clone() as Arc<dyn AgentStatePort>),
            user_model: Some(self.user_model_port.clone() as Arc<dyn UserModelPort>),
            memory: Some(self.memory_port.clone() as Arc<dyn MemoryPort>),
            scheduler: Some(self.scheduler_port.clone() as Arc<dyn SchedulerPort>),
            recipient: recipient.clone(),
        };

        let history = match &recipient {
            Some(r) => self.conversation.lock().await.history(r).to_vec(),
            None => Vec::new(),
        };
        let agent_state_json = self.agent_state_port.get_state().await;
        let user_model_json = self.user_model_port.get_user_model().await;
        let cards = self.registry.cards();

        let prompt_inputs = PromptInputs {
            identity_name: &self.identity_name,
            now,
            trigger,
            agent_state: &agent_state_json,
            user_model: &user_model_json,
            history: &history,
            max_history_messages: self.config.memory.max_history_messages,
            tool_cards: &cards,
            prior_tool_results: &[],
        };
        let prompt = build_prompt(&prompt_inputs);

        if let Some(r) = &recipient {
            self.conversation.lock().await.append(r.clone(), MessageRole::User, prompt_text_for(trigger), now);
        }

        let sink = TickSink { conversation: self.conversation.clone(), outbound: self.outbound.clone(), clock: self.clock.clone() };
        let abort = AbortFlag::new(false);
        let (terminal, loop_state) = self.agentic_loop.run(prompt, trigger, ctx, &sink, &abort, tick_id).await;

        let intent_ctx = IntentContext { tick_id, parent_signal_id: trigger.id, recipient: recipient.clone(), now };
        let intents = compile_intents(&terminal, &loop_state, &intent_ctx);
        let applied = intents.len();
        for intent in intents {
            self.apply_intent(intent).await;
        }

        if let Some(r) = &recipient {
            let needs_compaction = self.conversation.lock().await.needs_compaction(r);
            if needs_compaction {
                ConversationManager::spawn_compaction(&self.conversation, r.clone(), self.compactor.clone(), now);
            }
        }

        self.energy.lock().unwrap().drain(DrainKind::MotorAgentic);
        Ok(applied)
    }

    /// Applies a compiled intent (§4.7). Intents derived from a tool result
    /// whose side effect already ran against a port during the loop
    /// (`UpdateState`, `ScheduleEvent`, `Remember`, `SetInterest`) are
    /// traced only — the mutation is already durable by the time
    /// compilation happens. `EmitThought`, `SendMessage`, and
    /// `DeferSignal` have no in-loop side effect and are applied here.
    async fn apply_intent(&self, intent: Intent) {
        match intent {
            Intent::EmitThought { content, trace } => {
                let now = self.clock.now();
                let mut memory = self.memory.lock().await;
                if let Err(e) = memory.add_thought(content, 0, "cognition", now).await {
                    tracing::warn!(error = %e, tick_id = %trace.tick_id, "failed to persist emitted thought");
                }
            }
            Intent::SendMessage { recipient, text, status, confidence, trace } => {
                tracing::debug!(tick_id = %trace.tick_id, recipient = %recipient, "applying terminal send_message intent");
                self.record_send_message(recipient, text, status, confidence).await;
            }
            Intent::DeferSignal { signal_type, defer_until, reason, trace } => {
                tracing::debug!(tick_id = %trace.tick_id, signal_type = %signal_type, defer_until = %defer_until, "deferring signal");
                self.deferred.lock().unwrap().push(DeferredSignal { signal_type, reason, defer_until });
            }
            Intent::UpdateState { trace, .. } => {
                tracing::debug!(tick_id = %trace.tick_id, "agent state update already applied by core.agent tool execution");
            }
            Intent::ScheduleEvent { trace, .. } => {
                tracing::debug!(tick_id = %trace.tick_id, "schedule already created by core.schedule tool execution");
            }
            Intent::Remember { trace, subject, attribute, .. } => {
                tracing::debug!(tick_id = %trace.tick_id, subject = %subject, attribute = %attribute, "fact already written by core.remember tool execution");
            }
            Intent::SetInterest { trace, topic, .. } => {
                tracing::debug!(tick_id = %trace.tick_id, topic = %topic, "interest already set by core.set_interest tool execution");
            }
        }
    }

    async fn record_send_message(&self, recipient: String, text: String, status: ConversationStatus, confidence: f64) {
        let now = self.clock.now();
        self.conversation.lock().await.append(recipient.clone(), MessageRole::Agent, text.clone(), now);
        self.outbound.lock().unwrap().push_back(OutboundMessage { recipient, text, status, confidence, at: now });
    }

    fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        match self.config.scheduler.default_timezone.parse::<chrono_tz::Tz>() {
            Ok(tz) => now.with_timezone(&tz).format("%H").to_string().parse().unwrap_or(now.hour_utc()),
            Err(_) => now.hour_utc(),
        }
    }
}

trait HourUtc {
    fn hour_utc(&self) -> u32;
}

impl HourUtc for DateTime<Utc> {
    fn hour_utc(&self) -> u32 {
        use chrono::Timelike;
        self.hour()
    }
}

/// Immediate-intent sink wired to the orchestrator's conversation and
/// outbound queues, used for `core.say` messages emitted mid-loop (§4.6).
/// `core.remember`/`core.set_interest` are traced only since the tool
/// execution already performed their side effect against a port.
struct TickSink {
    conversation: Arc<AsyncMutex<ConversationManager>>,
    outbound: Arc<Mutex<VecDeque<OutboundMessage>>>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl ImmediateIntentSink for TickSink {
    async fn apply_immediate(&self, intent: Intent) {
        match intent {
            Intent::SendMessage { recipient, text, status, confidence, trace } => {
                let now = self.clock.now();
                tracing::debug!(tick_id = %trace.tick_id, recipient = %recipient, "applying immediate send_message intent");
                self.conversation.lock().await.append(recipient.clone(), MessageRole::Agent, text.clone(), now);
                self.outbound.lock().unwrap().push_back(OutboundMessage { recipient, text, status, confidence, at: now });
            }
            Intent::Remember { trace, subject, attribute, .. } => {
                tracing::debug!(tick_id = %trace.tick_id, subject = %subject, attribute = %attribute, "remember applied by tool execution");
            }
            Intent::SetInterest { trace, topic, .. } => {
                tracing::debug!(tick_id = %trace.tick_id, topic = %topic, "set_interest applied by tool execution");
            }
            other => {
                tracing::debug!(intent = ?other, "immediate intent ignored outside send_message/remember/set_interest");
            }
        }
    }
}

fn recipient_of(signal: &Signal) -> Option<String> {
    match &signal.data {
        Some(SignalData::UserMessage { recipient, .. }) => Some(recipient.clone()),
        _ => None,
    }
}

/// Picks the signal that actually caused the wake, falling back to the
/// highest-priority, most-recent signal in the tick if the wake engine's
/// trigger ids don't resolve (e.g. an energy-floor sleep override never
/// applies here since we only call this once `should_wake` is true).
fn pick_trigger(signals: &[Signal], decision: &WakeDecision) -> Option<Signal> {
    if let Some(id) = decision.trigger_signals.first() {
        if let Some(found) = signals.iter().find(|s| s.id == *id) {
            return Some(found.clone());
        }
    }
    signals.iter().max_by_key(|s| (s.priority, s.timestamp)).cloned()
}

fn signal_kind_for_deferral(signal_type: &str) -> SignalKind {
    match signal_type {
        "contact_urge" => SignalKind::ContactUrge,
        "threshold_crossed" => SignalKind::ThresholdCrossed,
        "pattern_break" => SignalKind::PatternBreak,
        "user_message" => SignalKind::UserMessage,
        _ => SignalKind::PluginEvent,
    }
}

fn prompt_text_for(signal: &Signal) -> String {
    match &signal.data {
        Some(SignalData::UserMessage { text, .. }) => text.clone(),
        _ => format!("[{:?} signal from {}]", signal.kind, signal.source),
    }
}

/// Builds the field policy table the registry's `core.remember` tool checks
/// against (§4.8). `restricted_fields` have no approval workflow in this
/// core (that collaborator is out of scope, §1), so when
/// `require_approval_for_restricted` is set, the only safe mapping is to
/// block them outright: a `min_confidence` no write can ever reach.
fn field_policy_table(config: &AppConfig) -> FieldPolicyTable {
    let mut table = FieldPolicyTable::default();
    if config.field_policy.require_approval_for_restricted {
        for field in &config.field_policy.restricted_fields {
            table.overrides.insert(
                field.clone(),
                soma_tools::FieldPolicyEntry { min_confidence: 1.01, require_source: None, escalate_if_uncertain: true, max_delta: None },
            );
        }
    }
    table
}

fn config_wake(config: &AppConfig) -> soma_config::WakeConfig {
    config.wake.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_of_extracts_user_message_recipient() {
        let signal = Signal::new(SignalKind::UserMessage, "telegram", Priority::High, Metrics::new(1.0), Utc::now())
            .with_data(SignalData::UserMessage { text: "hi".into(), channel: "telegram".into(), recipient: "user-1".into() });
        assert_eq!(recipient_of(&signal), Some("user-1".to_string()));
    }

    #[test]
    fn recipient_of_is_none_for_non_user_message_signals() {
        let signal = Signal::new(SignalKind::ContactUrge, "cognition", Priority::Normal, Metrics::new(0.9), Utc::now());
        assert_eq!(recipient_of(&signal), None);
    }

    #[test]
    fn pick_trigger_prefers_highest_priority_signal() {
        let now = Utc::now();
        let low = Signal::new(SignalKind::ChannelEvent, "a", Priority::Low, Metrics::new(0.1), now);
        let high = Signal::new(SignalKind::UserMessage, "b", Priority::High, Metrics::new(0.9), now);
        let decision = WakeDecision { should_wake: true, reason: Some("test".into()), trigger_signals: vec![] };
        let picked = pick_trigger(&[low, high.clone()], &decision).unwrap();
        assert_eq!(picked.id, high.id);
    }

    #[test]
    fn signal_kind_for_deferral_maps_known_types() {
        assert_eq!(signal_kind_for_deferral("contact_urge"), SignalKind::ContactUrge);
        assert_eq!(signal_kind_for_deferral("unknown"), SignalKind::PluginEvent);
    }
}
