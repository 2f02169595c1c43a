//! `core.time`: current time and time-since-event readings (§4.5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ports::ToolContext;
use crate::registry::{Tool, ToolError};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum TimeArgs {
    Now,
    Since { timestamp: DateTime<Utc> },
}

pub struct TimeTool {
    pub now: fn() -> DateTime<Utc>,
}

impl Default for TimeTool {
    fn default() -> Self {
        Self { now: Utc::now }
    }
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "core.time"
    }

    fn description(&self) -> &str {
        "Get the current time, or how long ago a given timestamp was. Accepts action \"now\" or \"since\"."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["now", "since"]},
                "timestamp": {"type": "string", "format": "date-time"}
            },
            "required": ["action"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["time".to_string(), "read_only".to_string()]
    }

    fn max_calls_per_turn(&self) -> u32 {
        6
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<TimeArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: TimeArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let now = (self.now)();
        match parsed {
            TimeArgs::Now => Ok(serde_json::json!({"now": now})),
            TimeArgs::Since { timestamp } => {
                let elapsed = now.signed_duration_since(timestamp);
                Ok(serde_json::json!({"seconds_elapsed": elapsed.num_seconds()}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn since_computes_elapsed_seconds() {
        let tool = TimeTool::default();
        let past = Utc::now() - chrono::Duration::seconds(90);
        let result = tool.execute(serde_json::json!({"action": "since", "timestamp": past}), &ToolContext::default()).await.unwrap();
        let secs = result["seconds_elapsed"].as_i64().unwrap();
        assert!((89..=91).contains(&secs));
    }

    #[test]
    fn validate_rejects_unknown_action() {
        let tool = TimeTool::default();
        assert!(tool.validate(&serde_json::json!({"action": "yesterday"})).is_err());
    }
}
