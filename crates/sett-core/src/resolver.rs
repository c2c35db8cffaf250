//! Role resolution: decide Primary vs. Client for a library root.
//!
//! Every host process calls [`resolve_role`] at startup. The resolver
//! canonicalizes the path, consults the global registry for the recorded
//! owner, probes it, and either elects this process as the Primary or
//! hands back a live connection to the existing one.
//!
//! A process's role can change from Client to Primary (promotion, after an
//! owner-lost error) but never the reverse while running. Promotion is
//! nothing more than re-running the same election with the knowledge that
//! the previously-known owner is gone.
//!
//! Registry unavailability never blocks startup: a corrupt or locked
//! registry degrades to a standalone Primary with no cross-process
//! coordination.

use crate::config::CoordinationConfig;
use crate::error::{Result, SettError};
use crate::ipc::server::{IpcDispatch, IpcServer, IpcServerHandle};
use crate::ipc::IpcClient;
use crate::platform;
use crate::registry::{InstanceEntry, InstanceRegistry, RegisterOutcome};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The resolved role of this process for one library root.
pub enum Role {
    /// This process owns the authoritative state and serves it.
    Primary(PrimaryHandle),
    /// Another process owns the state; proxy all calls to it.
    Client(ClientHandle),
}

impl Role {
    pub fn is_primary(&self) -> bool {
        matches!(self, Role::Primary(_))
    }
}

/// Handle held by the Primary's host: keeps the server alive and the
/// registry entry claimed. Dropping it shuts the server down and clears
/// this process's registration (best-effort; a crash skips this and is
/// detected lazily by the next prober).
pub struct PrimaryHandle {
    library_root: PathBuf,
    server: IpcServerHandle,
    registry: Option<InstanceRegistry>,
}

impl PrimaryHandle {
    /// Port the convergence server is bound to.
    pub fn port(&self) -> u16 {
        self.server.port
    }

    /// Loopback address of the convergence server.
    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    /// Canonical library root this process owns.
    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// True when the instance is registered for cross-process discovery;
    /// false when the registry was unavailable and this Primary runs
    /// standalone.
    pub fn is_registered(&self) -> bool {
        self.registry.is_some()
    }

    /// Graceful shutdown: clear our registry entry, then stop the server.
    pub fn shutdown(&mut self) {
        if let Some(reg) = self.registry.take() {
            let _ = reg.clear_instance_if(&self.library_root, std::process::id());
        }
        self.server.shutdown();
    }
}

impl Drop for PrimaryHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle held by a Client's host: a live connection to the Primary.
pub struct ClientHandle {
    client: IpcClient,
}

impl ClientHandle {
    /// Proxy a call to the Primary.
    ///
    /// An owner-lost error (`SharedInstanceLost`) is the host's signal to
    /// re-run [`resolve_role`] and attempt promotion.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        self.client.call(method, params).await
    }

    /// PID of the Primary this client is attached to.
    pub fn primary_pid(&self) -> u32 {
        self.client.primary_pid
    }

    /// Port of the Primary this client is attached to.
    pub fn primary_port(&self) -> u16 {
        self.client.primary_port
    }
}

/// Probe a recorded owner: cheap PID check first, then a real `ping`
/// round-trip. Only a completed round-trip counts as proof of life; only
/// an active failure counts as proof of death.
async fn probe(entry: &InstanceEntry, config: &Arc<CoordinationConfig>) -> Result<IpcClient> {
    if !platform::is_process_alive(entry.pid) {
        debug!("Recorded owner PID {} is not running", entry.pid);
        return Err(SettError::SharedInstanceLost {
            pid: entry.pid,
            port: entry.port,
        });
    }

    let addr = SocketAddr::from((std::net::Ipv4Addr::LOCALHOST, entry.port));
    let client = IpcClient::connect(addr, entry.pid, config.clone()).await?;
    client.ping().await?;
    Ok(client)
}

/// Resolve this process's role for `library_root`.
///
/// `dispatch` is the capability the convergence server routes method calls
/// into if this process becomes the Primary. The call binds the server
/// before attempting registration, so the published `(pid, port)` is
/// always connectable by the time anyone can read it.
pub async fn resolve_role<D: IpcDispatch>(
    library_root: impl AsRef<Path>,
    dispatch: Arc<D>,
    config: Arc<CoordinationConfig>,
) -> Result<Role> {
    let library_root = library_root.as_ref();
    let canonical = library_root
        .canonicalize()
        .map_err(|e| SettError::io_with_path(e, library_root))?;

    // Registry access is best-effort throughout: no coordination beats no
    // application.
    let registry = match InstanceRegistry::open(&config) {
        Ok(reg) => Some(reg),
        Err(e) => {
            warn!("Failed to open instance registry (running standalone): {}", e);
            None
        }
    };

    // A recorded owner that answers a ping wins immediately.
    let mut probed_dead: Option<InstanceEntry> = None;
    if let Some(ref reg) = registry {
        if let Some(entry) = reg.find_instance(&canonical) {
            match probe(&entry, &config).await {
                Ok(client) => {
                    info!(
                        "Converging on existing Primary (PID {} on port {})",
                        entry.pid, entry.port
                    );
                    return Ok(Role::Client(ClientHandle { client }));
                }
                Err(e) => {
                    debug!(
                        "Recorded owner (PID {} on port {}) failed probe: {}",
                        entry.pid, entry.port, e
                    );
                    probed_dead = Some(entry);
                }
            }
        }
    }

    // Election: bind locally first so registration publishes a connectable
    // endpoint.
    let server = IpcServer::start(dispatch, config.clone()).await?;
    let port = server.port;
    let pid = std::process::id();

    let Some(reg) = registry else {
        info!("Standalone Primary on port {} (no registry)", port);
        return Ok(Role::Primary(PrimaryHandle {
            library_root: canonical,
            server,
            registry: None,
        }));
    };

    let mut backoff = config.election_backoff;
    for attempt in 1..=config.election_max_attempts {
        match reg.try_register(&canonical, pid, port, probed_dead.as_ref()) {
            Ok(RegisterOutcome::Registered) => {
                info!("Elected Primary for {} on port {}", canonical.display(), port);
                return Ok(Role::Primary(PrimaryHandle {
                    library_root: canonical,
                    server,
                    registry: Some(reg),
                }));
            }
            Ok(RegisterOutcome::AlreadyOwned(current)) => {
                // Lost the race. If the winner is actually serving, join
                // it; if it is also dead (registry lag), carry the probe
                // evidence into the next attempt.
                match probe(&current, &config).await {
                    Ok(client) => {
                        info!(
                            "Lost election to PID {} on port {}, joining as Client",
                            current.pid, current.port
                        );
                        drop(server);
                        return Ok(Role::Client(ClientHandle { client }));
                    }
                    Err(e) => {
                        debug!(
                            "Election winner (PID {} on port {}) failed probe (attempt {}): {}",
                            current.pid, current.port, attempt, e
                        );
                        probed_dead = Some(current);
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.election_backoff_cap);
            }
            Err(e) => {
                // Store unavailable mid-election: degrade to standalone.
                warn!("Registration failed (running standalone): {}", e);
                return Ok(Role::Primary(PrimaryHandle {
                    library_root: canonical,
                    server,
                    registry: None,
                }));
            }
        }
    }

    Err(SettError::ElectionFailed {
        attempts: config.election_max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct NullDispatch;

    #[async_trait::async_trait]
    impl IpcDispatch for NullDispatch {
        async fn dispatch(
            &self,
            method: &str,
            _params: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, SettError> {
            Err(SettError::MethodNotFound {
                method: method.to_string(),
            })
        }
    }

    fn test_config(temp_dir: &TempDir) -> Arc<CoordinationConfig> {
        Arc::new(CoordinationConfig::with_registry_db(
            temp_dir.path().join("registry.db"),
        ))
    }

    #[tokio::test]
    async fn test_first_resolver_becomes_primary() {
        let temp_dir = TempDir::new().unwrap();
        let lib = temp_dir.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();

        let role = resolve_role(&lib, Arc::new(NullDispatch), test_config(&temp_dir))
            .await
            .unwrap();
        match role {
            Role::Primary(handle) => {
                assert!(handle.port() > 0);
                assert!(handle.is_registered());
            }
            Role::Client(_) => panic!("Expected Primary on a fresh path"),
        }
    }

    #[tokio::test]
    async fn test_missing_library_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("does-not-exist");

        let result = resolve_role(&missing, Arc::new(NullDispatch), test_config(&temp_dir)).await;
        assert!(matches!(result, Err(SettError::Io { .. })));
    }

    #[tokio::test]
    async fn test_second_resolver_becomes_client() {
        let temp_dir = TempDir::new().unwrap();
        let lib = temp_dir.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        let config = test_config(&temp_dir);

        let primary = resolve_role(&lib, Arc::new(NullDispatch), config.clone())
            .await
            .unwrap();
        let Role::Primary(primary) = primary else {
            panic!("Expected Primary");
        };

        let client = resolve_role(&lib, Arc::new(NullDispatch), config)
            .await
            .unwrap();
        match client {
            Role::Client(handle) => {
                assert_eq!(handle.primary_port(), primary.port());
                assert_eq!(handle.primary_pid(), std::process::id());
            }
            Role::Primary(_) => panic!("Expected Client while the Primary is alive"),
        }
    }

    #[tokio::test]
    async fn test_primary_drop_clears_registration() {
        let temp_dir = TempDir::new().unwrap();
        let lib = temp_dir.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        let config = test_config(&temp_dir);

        let role = resolve_role(&lib, Arc::new(NullDispatch), config.clone())
            .await
            .unwrap();
        drop(role);

        let registry = InstanceRegistry::open(&config).unwrap();
        assert!(registry.find_instance(&lib).is_none());
    }
}
