//! Wire format shared by both ends of a plugin connection.
//!
//! Each message is one frame: a big-endian `u32` byte count, then that many
//! bytes of JSON-RPC 2.0.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Hosts and plugins both issue calls, so an incoming frame is either a
//! request (it names a `method`) or the reply to one of ours.

use crate::config::IpcConfig;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

fn version() -> String {
    IpcConfig::JSONRPC_VERSION.to_string()
}

/// A call or, without `id`, a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl IpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::from(id)),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params: Some(params),
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Reply to a call. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    pub id: Option<Value>,
}

impl IpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// An error reply with no `data`, for protocol-level failures.
    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self::failure(
            id,
            IpcError {
                code,
                message,
                data: None,
            },
        )
    }

    pub fn failure(id: Option<Value>, error: IpcError) -> Self {
        Self {
            jsonrpc: version(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// The call outcome, with the error rebuilt into its `BridgeError`.
    ///
    /// serde reads `"result": null` as an absent result, so absent means
    /// `null` here.
    pub fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(BridgeError::from_ipc_error(err));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub enum IpcMessage {
    Request(IpcRequest),
    Response(IpcResponse),
}

impl IpcMessage {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload).map_err(|e| BridgeError::Decode {
            message: format!("Parse error: {}", e),
        })?;
        let is_request = value.get("method").is_some();
        let decoded = match is_request {
            true => serde_json::from_value(value).map(IpcMessage::Request),
            false => serde_json::from_value(value).map(IpcMessage::Response),
        };
        decoded.map_err(|e| BridgeError::Decode {
            message: format!("Invalid Request: {}", e),
        })
    }
}

fn oversized(len: usize) -> Option<String> {
    (len > IpcConfig::MAX_MESSAGE_SIZE).then(|| {
        format!(
            "frame of {} bytes exceeds the {} byte limit",
            len,
            IpcConfig::MAX_MESSAGE_SIZE
        )
    })
}

/// Read one frame. `Ok(None)` means the peer closed the stream between
/// frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if let Some(message) = oversized(len) {
        return Err(BridgeError::Decode { message });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    check_frame_size(payload.len())?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Refuse to send what the peer would refuse to read.
pub fn check_frame_size(len: usize) -> Result<()> {
    match oversized(len) {
        Some(message) => Err(BridgeError::Encode { message }),
        None => Ok(()),
    }
}
