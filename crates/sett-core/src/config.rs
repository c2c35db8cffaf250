//! Centralized configuration for the sett coordination layer.
//!
//! Fixed platform constants live on [`RegistryConfig`]; every runtime
//! tunable lives on [`CoordinationConfig`], which is handed to
//! [`resolve_role`](crate::resolver::resolve_role) at construction so no
//! limit or timeout is hardcoded at a use site.

use std::path::PathBuf;
use std::time::Duration;

/// Fixed constants for the global registry and IPC defaults.
pub struct RegistryConfig;

impl RegistryConfig {
    /// Directory name under the platform config dir (`~/.config/sett` on Linux).
    pub const APP_CONFIG_DIR_NAME: &'static str = "sett";
    /// Registry database filename.
    pub const DB_FILENAME: &'static str = "registry.db";

    /// Default maximum IPC frame payload size: 16 MiB.
    pub const MAX_IPC_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    /// Default maximum concurrently served IPC connections.
    pub const MAX_IPC_CONNECTIONS: usize = 16;
    /// Default SQLite busy timeout for cross-process contention.
    pub const BUSY_TIMEOUT_MS: u64 = 5_000;
    /// Default TCP connect timeout for probes and client connections.
    pub const IPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    /// Default deadline for a `ping` round-trip during a liveness probe.
    pub const IPC_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default maximum registration attempts when losing election races.
    pub const ELECTION_MAX_ATTEMPTS: u32 = 5;
    /// Default initial backoff between registration attempts.
    pub const ELECTION_BACKOFF: Duration = Duration::from_millis(100);
    /// Default ceiling for the doubled backoff.
    pub const ELECTION_BACKOFF_CAP: Duration = Duration::from_secs(2);
}

/// Runtime knobs for one coordination stack (registry + server + client +
/// resolver). Cheap to clone; the resolver shares it with everything it
/// constructs.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Maximum IPC frame payload size in bytes.
    pub max_message_size: usize,
    /// Maximum concurrently served IPC connections; further connections
    /// are refused, not queued.
    pub max_connections: usize,
    /// SQLite busy timeout. Bounds how long a registry transaction waits
    /// on another process before failing.
    pub busy_timeout: Duration,
    /// TCP connect timeout for probes and client connections.
    pub connect_timeout: Duration,
    /// Deadline for a `ping` round-trip during a liveness probe.
    pub probe_timeout: Duration,
    /// Maximum registration attempts before the election is abandoned.
    pub election_max_attempts: u32,
    /// Initial backoff between registration attempts; doubled per attempt.
    pub election_backoff: Duration,
    /// Ceiling for the doubled backoff.
    pub election_backoff_cap: Duration,
    /// Override for the registry database location. `None` uses the
    /// platform default under the per-user config directory.
    pub registry_db_path: Option<PathBuf>,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_message_size: RegistryConfig::MAX_IPC_MESSAGE_SIZE,
            max_connections: RegistryConfig::MAX_IPC_CONNECTIONS,
            busy_timeout: Duration::from_millis(RegistryConfig::BUSY_TIMEOUT_MS),
            connect_timeout: RegistryConfig::IPC_CONNECT_TIMEOUT,
            probe_timeout: RegistryConfig::IPC_PROBE_TIMEOUT,
            election_max_attempts: RegistryConfig::ELECTION_MAX_ATTEMPTS,
            election_backoff: RegistryConfig::ELECTION_BACKOFF,
            election_backoff_cap: RegistryConfig::ELECTION_BACKOFF_CAP,
            registry_db_path: None,
        }
    }
}

impl CoordinationConfig {
    /// Config pointing the registry at an explicit database path.
    ///
    /// Used by tests and by hosts that keep per-deployment state away from
    /// the user config directory.
    pub fn with_registry_db(db_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_db_path: Some(db_path.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_registry_constants() {
        let config = CoordinationConfig::default();
        assert_eq!(config.max_message_size, RegistryConfig::MAX_IPC_MESSAGE_SIZE);
        assert_eq!(config.max_connections, RegistryConfig::MAX_IPC_CONNECTIONS);
        assert!(config.registry_db_path.is_none());
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        let config = CoordinationConfig::default();
        assert!(config.busy_timeout > Duration::ZERO);
        assert!(config.election_backoff < config.election_backoff_cap);
        assert!(config.election_max_attempts >= 1);
    }

    #[test]
    fn test_with_registry_db_overrides_path() {
        let config = CoordinationConfig::with_registry_db("/tmp/test.db");
        assert_eq!(
            config.registry_db_path.as_deref(),
            Some(std::path::Path::new("/tmp/test.db"))
        );
    }
}
