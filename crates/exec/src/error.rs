use thiserror::Error;

/// Errors surfaced by the container manager. These never propagate as a
/// panic across the crate boundary — every fallible operation here returns
/// `Result<_, ContainerError>` so callers (the agentic loop's tool
/// executors) can turn a failure into a non-success `ToolResult` instead of
/// aborting the tick.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container runtime command failed: {0}")]
    RuntimeCommand(String),

    #[error("failed to resolve domain {domain}: {reason}")]
    DnsResolution { domain: String, reason: String },

    #[error("network policy setup failed: {0}")]
    PolicySetup(String),

    #[error("container {0} was already destroyed")]
    AlreadyDestroyed(String),

    #[error("pending request {0} timed out")]
    RequestTimeout(String),

    #[error("ipc frame error: {0}")]
    Frame(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
