//! Sandboxed skill execution (C12): container-isolated runs with network
//! policy enforcement and length-prefixed IPC framing.

pub mod container;
pub mod error;
pub mod frame;
pub mod network;

pub use container::{ContainerHandle, ContainerManager, StartOptions, MANAGED_LABEL};
pub use error::{ContainerError, Result};
pub use frame::{encode_frame, FrameDecoder, IpcRequest, IpcResponse};
pub use network::{add_host_args, apply_iptables_policy, resolve_domains, ResolvedDomain};
