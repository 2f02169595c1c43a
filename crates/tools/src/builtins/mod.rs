pub mod control;
pub mod introspect;
pub mod memory;
pub mod meta;
pub mod schedule;
pub mod state;
pub mod thought;
pub mod time;

pub use control::{DeferTool, EscalateTool, SayTool};
pub use introspect::IntrospectTool;
pub use memory::{MemoryTool, RememberTool};
pub use meta::MetaTool;
pub use schedule::ScheduleTool;
pub use state::{AgentStateTool, SetInterestTool, UserModelTool};
pub use thought::ThoughtTool;
pub use time::TimeTool;
