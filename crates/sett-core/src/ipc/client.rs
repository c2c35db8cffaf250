//! TCP IPC client for connecting to a Primary instance.
//!
//! Establishes a TCP connection to the Primary's IPC server and provides
//! a `call()` method for transparent JSON-RPC method invocation.
//!
//! # Thread Safety
//!
//! The client uses a tokio `Mutex` held across the entire request/response
//! cycle, so interleaved concurrent calls never corrupt each other's
//! frames. Calls queue behind each other; the Primary serves each
//! connection sequentially anyway.

use super::protocol::{decode_response, read_frame, write_frame, IpcRequest};
use crate::config::CoordinationConfig;
use crate::error::{Result, SettError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// IPC client that connects to a Primary instance's server.
#[derive(Debug)]
pub struct IpcClient {
    stream: Mutex<TcpStream>,
    addr: SocketAddr,
    next_id: AtomicU64,
    config: Arc<CoordinationConfig>,
    /// PID of the Primary (for owner-lost reporting).
    pub primary_pid: u32,
    /// Port of the Primary (for owner-lost reporting).
    pub primary_port: u16,
}

impl IpcClient {
    /// Connect to a Primary instance's IPC server.
    ///
    /// Bounded by the configured connect timeout; both timeout and refusal
    /// surface as `SharedInstanceLost` since either means the recorded
    /// owner is unreachable.
    pub async fn connect(
        addr: SocketAddr,
        pid: u32,
        config: Arc<CoordinationConfig>,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SettError::SharedInstanceLost {
                pid,
                port: addr.port(),
            })?
            .map_err(|_| SettError::SharedInstanceLost {
                pid,
                port: addr.port(),
            })?;

        debug!("IPC client connected to {} (PID {})", addr, pid);

        Ok(Self {
            stream: Mutex::new(stream),
            addr,
            next_id: AtomicU64::new(1),
            config,
            primary_pid: pid,
            primary_port: addr.port(),
        })
    }

    /// Call a JSON-RPC method on the Primary instance.
    ///
    /// Returns the result value on success. Any I/O failure during the
    /// cycle returns `SharedInstanceLost` with the last-known `(pid,
    /// port)`; the client never retries or reconnects — promotion is the
    /// host's decision.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = IpcRequest::new(method, params, id);
        let request_bytes = serde_json::to_vec(&request)?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &request_bytes)
            .await
            .map_err(|_| self.owner_lost())?;

        let response_bytes = read_frame(&mut reader, self.config.max_message_size)
            .await
            .map_err(|_| self.owner_lost())?
            .ok_or_else(|| self.owner_lost())?;

        let response = decode_response(&response_bytes)?;

        if let Some(err) = response.error {
            return Err(SettError::Other(err.message));
        }

        response
            .result
            .ok_or_else(|| SettError::Other("IPC response missing result".to_string()))
    }

    /// Trivial round-trip used as a liveness probe, bounded by the probe
    /// timeout.
    pub async fn ping(&self) -> Result<()> {
        let result = tokio::time::timeout(
            self.config.probe_timeout,
            self.call("ping", serde_json::json!({})),
        )
        .await
        .map_err(|_| self.owner_lost())??;

        if result == serde_json::json!("pong") {
            Ok(())
        } else {
            Err(SettError::Protocol {
                message: format!("Unexpected ping reply: {}", result),
            })
        }
    }

    fn owner_lost(&self) -> SettError {
        SettError::SharedInstanceLost {
            pid: self.primary_pid,
            port: self.primary_port,
        }
    }

    /// Get the address of the connected Primary instance.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::{IpcDispatch, IpcServer};

    struct TestDispatch;

    #[async_trait::async_trait]
    impl IpcDispatch for TestDispatch {
        async fn dispatch(
            &self,
            method: &str,
            params: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, SettError> {
            match method {
                "add" => {
                    let a = params["a"].as_i64().unwrap_or(0);
                    let b = params["b"].as_i64().unwrap_or(0);
                    Ok(serde_json::json!(a + b))
                }
                _ => Err(SettError::MethodNotFound {
                    method: method.to_string(),
                }),
            }
        }
    }

    fn test_config() -> Arc<CoordinationConfig> {
        Arc::new(CoordinationConfig::default())
    }

    #[tokio::test]
    async fn test_client_ping_success() {
        let mut handle = IpcServer::start(Arc::new(TestDispatch), test_config())
            .await
            .unwrap();

        let client = IpcClient::connect(handle.addr(), std::process::id(), test_config())
            .await
            .unwrap();

        client.ping().await.unwrap();

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_call_with_params() {
        let mut handle = IpcServer::start(Arc::new(TestDispatch), test_config())
            .await
            .unwrap();

        let client = IpcClient::connect(handle.addr(), std::process::id(), test_config())
            .await
            .unwrap();

        let result = client
            .call("add", serde_json::json!({"a": 3, "b": 4}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(7));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_call_error_returns_err() {
        let mut handle = IpcServer::start(Arc::new(TestDispatch), test_config())
            .await
            .unwrap();

        let client = IpcClient::connect(handle.addr(), std::process::id(), test_config())
            .await
            .unwrap();

        let result = client.call("nonexistent", serde_json::json!({})).await;
        assert!(result.is_err());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_connect_to_dead_server_returns_shared_instance_lost() {
        // Use a port that nothing is listening on
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = IpcClient::connect(addr, 999_999, test_config()).await;

        match result.unwrap_err() {
            SettError::SharedInstanceLost { pid, port } => {
                assert_eq!(pid, 999_999);
                assert_eq!(port, 1);
            }
            other => panic!("Expected SharedInstanceLost, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_detects_server_shutdown() {
        let mut handle = IpcServer::start(Arc::new(TestDispatch), test_config())
            .await
            .unwrap();
        let pid = std::process::id();
        let port = handle.port;

        let client = IpcClient::connect(handle.addr(), pid, test_config())
            .await
            .unwrap();

        client.ping().await.unwrap();

        handle.shutdown();

        // Retry until the close propagates (up to 1s)
        let mut lost = None;
        for _ in 0..20 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if let Err(e) = client.ping().await {
                lost = Some(e);
                break;
            }
        }
        match lost {
            Some(SettError::SharedInstanceLost {
                pid: lost_pid,
                port: lost_port,
            }) => {
                assert_eq!(lost_pid, pid);
                assert_eq!(lost_port, port);
            }
            other => panic!("Expected SharedInstanceLost, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_interleave() {
        let mut handle = IpcServer::start(Arc::new(TestDispatch), test_config())
            .await
            .unwrap();

        let client = Arc::new(
            IpcClient::connect(handle.addr(), std::process::id(), test_config())
                .await
                .unwrap(),
        );

        // Many tasks share one connection; each must get its own answer.
        let mut tasks = Vec::new();
        for i in 0i64..32 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let result = client
                    .call("add", serde_json::json!({"a": i, "b": i}))
                    .await
                    .unwrap();
                assert_eq!(result, serde_json::json!(i * 2));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        handle.shutdown();
    }
}
