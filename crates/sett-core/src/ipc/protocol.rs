//! Shared IPC protocol types and framing.
//!
//! Defines the wire format for local IPC: 4-byte big-endian length prefix
//! followed by a UTF-8 JSON-RPC 2.0 payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Decode violations (oversized length, malformed UTF-8, invalid JSON,
//! wrong `jsonrpc` version) are typed errors and are fatal to the
//! connection they occur on. No resync is attempted: scanning a byte
//! stream for the next plausible frame is ambiguous, so the peer closes
//! and reconnects instead.

use crate::error::{Result, SettError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// JSON-RPC 2.0 request for IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

impl IpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(serde_json::Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response for IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    pub id: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Create a success response.
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(IpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// The announced length is validated against `max_len` before any payload
/// allocation. Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_len {
        return Err(SettError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode a frame payload as a JSON-RPC request.
///
/// UTF-8, JSON, and schema violations are `Protocol` errors; the caller
/// closes the connection on any of them.
pub fn decode_request(frame: &[u8]) -> Result<IpcRequest> {
    let text = std::str::from_utf8(frame).map_err(|_| SettError::Protocol {
        message: "Invalid UTF-8 in IPC frame".to_string(),
    })?;

    let request: IpcRequest = serde_json::from_str(text).map_err(|e| SettError::Protocol {
        message: format!("Invalid JSON-RPC request: {}", e),
    })?;

    if request.jsonrpc != "2.0" {
        return Err(SettError::Protocol {
            message: format!("Unsupported jsonrpc version: {}", request.jsonrpc),
        });
    }

    Ok(request)
}

/// Decode a frame payload as a JSON-RPC response.
pub fn decode_response(frame: &[u8]) -> Result<IpcResponse> {
    let text = std::str::from_utf8(frame).map_err(|_| SettError::Protocol {
        message: "Invalid UTF-8 in IPC frame".to_string(),
    })?;

    let response: IpcResponse = serde_json::from_str(text).map_err(|e| SettError::Protocol {
        message: format!("Invalid JSON-RPC response: {}", e),
    })?;

    if response.jsonrpc != "2.0" {
        return Err(SettError::Protocol {
            message: format!("Unsupported jsonrpc version: {}", response.jsonrpc),
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    const MAX: usize = RegistryConfig::MAX_IPC_MESSAGE_SIZE;

    #[test]
    fn test_request_serialization_roundtrip() {
        let req = IpcRequest::new("list_models", serde_json::json!({"limit": 10}), 1);
        let bytes = serde_json::to_vec(&req).unwrap();
        let parsed = decode_request(&bytes).unwrap();

        assert_eq!(parsed, req);
        assert_eq!(parsed.jsonrpc, "2.0");
        assert_eq!(parsed.method, "list_models");
    }

    #[test]
    fn test_response_serialization_skips_absent_fields() {
        let ok = IpcResponse::success(
            Some(serde_json::Value::Number(1.into())),
            serde_json::json!({"models": []}),
        );
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));

        let err = IpcResponse::error(
            Some(serde_json::Value::Number(1.into())),
            -32603,
            "Internal error".to_string(),
        );
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("\"result\""));
        assert!(json.contains("-32603"));
    }

    #[test]
    fn test_response_decode_roundtrip() {
        let resp = IpcResponse::success(
            Some(serde_json::Value::Number(7.into())),
            serde_json::json!({"ok": true}),
        );
        let bytes = serde_json::to_vec(&resp).unwrap();
        assert_eq!(decode_response(&bytes).unwrap(), resp);
    }

    #[test]
    fn test_decode_request_rejects_invalid_utf8() {
        let err = decode_request(&[0xff, 0xfe, 0xfd]).unwrap_err();
        assert!(matches!(err, SettError::Protocol { .. }));
    }

    #[test]
    fn test_decode_request_rejects_invalid_json() {
        let err = decode_request(b"not valid json").unwrap_err();
        assert!(matches!(err, SettError::Protocol { .. }));
    }

    #[test]
    fn test_decode_request_rejects_wrong_version() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "jsonrpc": "1.0",
            "method": "ping",
            "id": 1,
        }))
        .unwrap();
        let err = decode_request(&bytes).unwrap_err();
        assert!(matches!(err, SettError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let payload = b"hello world";
        let mut buf = Vec::new();

        write_frame(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor, MAX).await.unwrap();

        assert_eq!(read_back, Some(payload.to_vec()));
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor, MAX).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_error() {
        // Craft a frame header claiming a payload one past the cap
        let huge_len: u32 = (MAX + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, MAX).await.unwrap_err();
        assert!(matches!(err, SettError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_frame_respects_configured_cap() {
        let payload = vec![b'x'; 128];
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf.clone());
        assert!(read_frame(&mut cursor, 64).await.is_err());

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(
            read_frame(&mut cursor, 128).await.unwrap(),
            Some(payload)
        );
    }
}
