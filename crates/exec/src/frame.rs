//! Length-prefixed JSON framing for container IPC (§4.9, §6, §9 "Container
//! IPC framing").
//!
//! Kept fully synchronous and separate from I/O: a [`FrameDecoder`] consumes
//! arbitrary byte chunks and invokes a callback per complete frame. Callers
//! own the actual read loop (stdout of the container's child process);
//! this module only knows how to find frame boundaries.

use serde::{Deserialize, Serialize};

use crate::error::{ContainerError, Result};

/// 4-byte big-endian length prefix, followed by that many bytes of JSON.
const LENGTH_PREFIX_BYTES: usize = 4;

/// Request frame sent to a container's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Execute {
        id: String,
        skill: String,
        args: serde_json::Value,
    },
    Credential {
        id: String,
        name: String,
        value: String,
    },
}

impl IpcRequest {
    pub fn id(&self) -> &str {
        match self {
            IpcRequest::Execute { id, .. } => id,
            IpcRequest::Credential { id, .. } => id,
        }
    }
}

/// Response frame read from a container's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Result {
        id: String,
        data: serde_json::Value,
    },
    CredentialAck {
        id: String,
    },
    Error {
        id: Option<String>,
        message: String,
    },
}

impl IpcResponse {
    /// Id of the pending request this response resolves or rejects, if any.
    /// `Error` frames with no `id` are "unparented" — logged, never matched
    /// to a pending request.
    pub fn id(&self) -> Option<&str> {
        match self {
            IpcResponse::Result { id, .. } => Some(id),
            IpcResponse::CredentialAck { id } => Some(id),
            IpcResponse::Error { id, .. } => id.as_deref(),
        }
    }
}

/// Encode a single frame: 4-byte big-endian length + JSON body.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Stateful decoder that buffers partial reads and yields complete frames.
/// Deliberately has no I/O of its own — `feed` takes whatever bytes the
/// caller just read and returns every frame that became complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the internal buffer and drain out every frame that
    /// is now fully buffered, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<IpcResponse>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < LENGTH_PREFIX_BYTES {
                break;
            }
            let len = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            if self.buf.len() < LENGTH_PREFIX_BYTES + len {
                break;
            }
            let body = self.buf[LENGTH_PREFIX_BYTES..LENGTH_PREFIX_BYTES + len].to_vec();
            self.buf.drain(0..LENGTH_PREFIX_BYTES + len);
            let response: IpcResponse = serde_json::from_slice(&body)
                .map_err(|e| ContainerError::Frame(format!("malformed frame body: {e}")))?;
            frames.push(response);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_frame() {
        let req = IpcRequest::Execute { id: "r1".into(), skill: "echo".into(), args: serde_json::json!({}) };
        let encoded = encode_frame(&req).unwrap();

        let resp = IpcResponse::Result { id: "r1".into(), data: serde_json::json!({"ok": true}) };
        let resp_bytes = encode_frame(&resp).unwrap();

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&resp_bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), Some("r1"));
        let _ = encoded;
    }

    #[test]
    fn handles_frames_split_across_multiple_reads() {
        let resp = IpcResponse::Result { id: "r2".into(), data: serde_json::json!(42) };
        let bytes = encode_frame(&resp).unwrap();

        let mut decoder = FrameDecoder::new();
        let (first, second) = bytes.split_at(bytes.len() / 2);
        assert!(decoder.feed(first).unwrap().is_empty());
        let frames = decoder.feed(second).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn decodes_multiple_frames_in_one_chunk() {
        let a = encode_frame(&IpcResponse::CredentialAck { id: "a".into() }).unwrap();
        let b = encode_frame(&IpcResponse::Error { id: None, message: "boom".into() }).unwrap();
        let mut combined = a;
        combined.extend_from_slice(&b);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&combined).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].id(), None);
    }
}
