//! TCP IPC server for the Primary instance.
//!
//! Listens on `127.0.0.1:0` (OS-assigned port), accepts connections from
//! Client instances, and routes JSON-RPC method calls into the embedding
//! subsystem through an injected [`IpcDispatch`] capability. The server
//! itself never touches the registry; publishing `(pid, port)` is the
//! resolver's job after a successful bind.
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime. Each connection is handled in its
//! own spawned task; within one connection, requests are processed
//! strictly sequentially (read, dispatch, write), so per-connection FIFO
//! ordering holds. Cross-connection ordering is not guaranteed.

use super::protocol::{decode_request, read_frame, write_frame, IpcResponse};
use crate::config::CoordinationConfig;
use crate::error::{Result, SettError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running IPC server. Dropping shuts down the server.
pub struct IpcServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl IpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down the server gracefully.
    ///
    /// Stops accepting new connections and signals all active connection
    /// handlers to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Capability for dispatching IPC method calls into the embedding
/// subsystem.
///
/// The convergence layer does not define any application methods; it only
/// routes to them. Handlers may suspend arbitrarily; the server imposes no
/// ordering beyond per-connection sequencing.
#[async_trait::async_trait]
pub trait IpcDispatch: Send + Sync + 'static {
    /// Dispatch a JSON-RPC method call and return the result.
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, SettError>;
}

/// IPC server that listens for Client connections.
pub struct IpcServer;

impl IpcServer {
    /// Start the IPC server on a random local port.
    ///
    /// Always binds an OS-assigned ephemeral port on loopback; a fixed
    /// port would collide between independent libraries on one machine.
    /// Returns a handle used to read the port and shut the server down.
    pub async fn start<D: IpcDispatch>(
        dispatch: Arc<D>,
        config: Arc<CoordinationConfig>,
    ) -> Result<IpcServerHandle> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("IPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            dispatch,
            config,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(IpcServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<D: IpcDispatch>(
        listener: TcpListener,
        dispatch: Arc<D>,
        config: Arc<CoordinationConfig>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("IPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= config.max_connections {
                                // Refuse rather than queue: dropping the
                                // stream closes it immediately.
                                warn!(
                                    "Refusing IPC connection from {}: at max capacity ({})",
                                    peer_addr,
                                    config.max_connections
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let dispatch = dispatch.clone();
                            let config = config.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("IPC connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, &*dispatch, &config, &mut conn_shutdown).await {
                                    debug!("IPC connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("IPC accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Serve one connection: strictly sequential read/dispatch/write
    /// cycles until clean EOF, protocol violation, or server shutdown.
    async fn handle_connection<D: IpcDispatch>(
        mut stream: TcpStream,
        dispatch: &D,
        config: &CoordinationConfig,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.split();

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader, config.max_message_size) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()), // Clean disconnect
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(()); // Server shutting down
                }
            };

            // Decode violations are fatal to this connection only; the `?`
            // drops the stream without touching other connections.
            let request = decode_request(&frame)?;

            let params = request
                .params
                .unwrap_or(serde_json::Value::Object(Default::default()));

            // `ping` is answered here so the liveness probe works against
            // any host dispatch table.
            let response = if request.method == "ping" {
                IpcResponse::success(request.id, serde_json::json!("pong"))
            } else {
                match dispatch.dispatch(&request.method, params).await {
                    Ok(result) => IpcResponse::success(request.id, result),
                    Err(e) => {
                        let code = e.to_rpc_error_code();
                        IpcResponse::error(request.id, code, e.to_string())
                    }
                }
            };

            let response_bytes = serde_json::to_vec(&response)?;
            write_frame(&mut writer, &response_bytes).await?;
        }
    }
}
