//! `core.schedule`: create/cancel/list schedules via the [`SchedulerPort`]
//! (§4.5, owned by C3 in `soma-runtime`).

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::ports::{ScheduleRequest, ToolContext};
use crate::registry::{Tool, ToolError};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ScheduleArgs {
    Create {
        #[serde(flatten)]
        request: ScheduleRequest,
    },
    Cancel {
        id: Uuid,
    },
    List,
}

pub struct ScheduleTool {
    pub owner: String,
}

#[async_trait]
impl Tool for ScheduleTool {
    fn name(&self) -> &str {
        "core.schedule"
    }

    fn description(&self) -> &str {
        "Create, cancel, or list schedules owned by this agent. Accepts action \"create\", \"cancel\", or \"list\"."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["create", "cancel", "list"]},
                "next_fire_at": {"type": "string", "format": "date-time"},
                "recurrence": {"type": "object"},
                "timezone": {"type": "string"},
                "local_time": {"type": "string"},
                "data": {"type": "object"},
                "id": {"type": "string", "format": "uuid"}
            },
            "required": ["action"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["scheduling".to_string()]
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn max_calls_per_turn(&self) -> u32 {
        4
    }

    fn validate(&self, args: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<ScheduleArgs>(args.clone()).map(|_| ()).map_err(|e| ToolError::new(e.to_string()))
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<serde_json::Value, ToolError> {
        let parsed: ScheduleArgs = serde_json::from_value(args).map_err(|e| ToolError::new(e.to_string()))?;
        let scheduler = ctx.require_scheduler()?;
        match parsed {
            ScheduleArgs::Create { request } => {
                let id = scheduler.schedule(&self.owner, request.clone()).await?;
                Ok(serde_json::json!({
                    "action": "create",
                    "id": id,
                    "next_fire_at": request.next_fire_at,
                    "recurrence": request.recurrence,
                    "timezone": request.timezone,
                    "local_time": request.local_time,
                    "data": request.data,
                }))
            }
            ScheduleArgs::Cancel { id } => {
                let existed = scheduler.cancel(&self.owner, id).await?;
                Ok(serde_json::json!({"existed": existed}))
            }
            ScheduleArgs::List => {
                let ids = scheduler.list(&self.owner).await;
                Ok(serde_json::json!({"ids": ids}))
            }
        }
    }
}
