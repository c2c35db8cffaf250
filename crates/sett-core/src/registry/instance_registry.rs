//! SQLite-backed registry of library roots and their owning instances.
//!
//! Cross-process serialization is delegated to SQLite: registration runs
//! inside a `BEGIN IMMEDIATE` transaction bounded by the busy timeout, so
//! concurrent registrations from different processes cannot both succeed.
//! Within a process, `Arc<Mutex<Connection>>` serializes access to the
//! connection handle.
//!
//! Liveness is never inferred from row freshness. There are no heartbeat
//! updates; a stale row is detected by the caller probing the recorded
//! `(pid, port)` and is superseded in place.

use crate::config::CoordinationConfig;
use crate::error::{Result, SettError};
use crate::platform;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A registered library root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    /// Stable id: lowercase hex SHA-256 of the canonical path.
    pub library_id: String,
    /// Canonical absolute path (symlinks resolved). Never stored
    /// un-canonicalized.
    pub path: PathBuf,
    /// First-registration timestamp, immutable after creation.
    pub created_at: String,
}

/// The currently-believed-live owner of a library root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub library_id: String,
    pub pid: u32,
    pub port: u16,
    pub started_at: String,
}

/// Outcome of a registration attempt.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// This process now owns the library root.
    Registered,
    /// Another live process holds the entry; contains the current row.
    AlreadyOwned(InstanceEntry),
}

/// Derive the stable library id for a canonical path.
///
/// Two hosts referencing the same directory via different symlinks resolve
/// to one id because the input is always the canonicalized path.
pub fn library_id_for(canonical: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

/// SQLite-backed global registry for owner discovery and election.
pub struct InstanceRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl InstanceRegistry {
    /// Open the registry at the location named by `config`, falling back to
    /// the platform default under the per-user config directory.
    ///
    /// Creates the database and parent directories if they don't exist.
    pub fn open(config: &CoordinationConfig) -> Result<Self> {
        let db_path = match &config.registry_db_path {
            Some(path) => path.clone(),
            None => platform::registry_db_path()?,
        };
        Self::open_at(&db_path, config)
    }

    /// Open the registry at a specific path.
    pub fn open_at(db_path: &Path, config: &CoordinationConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| SettError::Io {
                    message: format!("Failed to create registry directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::configure_connection(&conn, config)?;
        Self::ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection, config: &CoordinationConfig) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA temp_store=MEMORY;",
            config.busy_timeout.as_millis(),
        ))?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS libraries (
                library_id TEXT PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS instances (
                library_id TEXT PRIMARY KEY,
                pid INTEGER NOT NULL,
                port INTEGER NOT NULL,
                started_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SettError::Database {
            message: "Failed to acquire registry connection lock".to_string(),
            source: None,
        })
    }

    fn canonicalize(path: &Path) -> Result<PathBuf> {
        path.canonicalize().map_err(|e| SettError::Io {
            message: format!("Failed to canonicalize path: {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })
    }

    // ========================================
    // Owner discovery
    // ========================================

    /// Look up the recorded owner for a library root.
    ///
    /// Fails softly: a locked, corrupt, or otherwise unavailable store logs
    /// a warning and reads as "no entry found", so the caller can proceed
    /// as a standalone Primary instead of erroring out the application.
    pub fn find_instance(&self, path: &Path) -> Option<InstanceEntry> {
        match self.find_instance_inner(path) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Registry lookup failed (treating as no entry): {}", e);
                None
            }
        }
    }

    fn find_instance_inner(&self, path: &Path) -> Result<Option<InstanceEntry>> {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let library_id = library_id_for(&canonical);

        let conn = self.lock_conn()?;
        let result = conn
            .query_row(
                "SELECT library_id, pid, port, started_at
                 FROM instances WHERE library_id = ?1",
                params![library_id],
                |row| {
                    Ok(InstanceEntry {
                        library_id: row.get(0)?,
                        pid: row.get(1)?,
                        port: row.get::<_, u16>(2)?,
                        started_at: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    // ========================================
    // Election
    // ========================================

    /// Atomically claim ownership of a library root.
    ///
    /// Runs as a single `BEGIN IMMEDIATE` transaction so that concurrent
    /// callers across processes serialize on the storage engine's write
    /// lock (bounded by the busy timeout). The claim succeeds when:
    /// - no instance row exists for the library, or
    /// - the current row matches `expected_dead` — the entry the caller
    ///   probed and found unreachable, or
    /// - the recorded PID is no longer running.
    ///
    /// Otherwise the current row is returned as `AlreadyOwned` and the
    /// caller should re-probe it. Replacement is a single upsert inside the
    /// transaction; there is no window with zero or two owners.
    pub fn try_register(
        &self,
        path: &Path,
        pid: u32,
        port: u16,
        expected_dead: Option<&InstanceEntry>,
    ) -> Result<RegisterOutcome> {
        let canonical = Self::canonicalize(path)?;
        let library_id = library_id_for(&canonical);
        let path_str = canonical.to_string_lossy().to_string();
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<InstanceEntry> = tx
            .query_row(
                "SELECT library_id, pid, port, started_at
                 FROM instances WHERE library_id = ?1",
                params![library_id],
                |row| {
                    Ok(InstanceEntry {
                        library_id: row.get(0)?,
                        pid: row.get(1)?,
                        port: row.get::<_, u16>(2)?,
                        started_at: row.get(3)?,
                    })
                },
            )
            .optional()?;

        if let Some(ref cur) = current {
            let probed_dead = expected_dead
                .map(|e| e.pid == cur.pid && e.port == cur.port)
                .unwrap_or(false);

            if !probed_dead && platform::is_process_alive(cur.pid) {
                let owned = cur.clone();
                tx.rollback()?;
                debug!(
                    "Registration for {} lost to PID {} on port {}",
                    path_str, owned.pid, owned.port
                );
                return Ok(RegisterOutcome::AlreadyOwned(owned));
            }
        }

        // First election for a path creates the library row; created_at is
        // immutable thereafter.
        tx.execute(
            "INSERT OR IGNORE INTO libraries (library_id, path, created_at)
             VALUES (?1, ?2, ?3)",
            params![library_id, path_str, now],
        )?;

        tx.execute(
            "INSERT INTO instances (library_id, pid, port, started_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(library_id) DO UPDATE SET
                 pid=excluded.pid,
                 port=excluded.port,
                 started_at=excluded.started_at",
            params![library_id, pid, port, now],
        )?;

        tx.commit()?;

        debug!(
            "Registered instance for {}: PID {} on port {}",
            path_str, pid, port
        );

        Ok(RegisterOutcome::Registered)
    }

    /// Best-effort cleanup on graceful shutdown.
    ///
    /// Removes the instance row only if it still records `expected_pid`, so
    /// a slow exit cannot clobber a successor's registration. Crashes never
    /// reach this call; correctness does not depend on it.
    pub fn clear_instance_if(&self, path: &Path, expected_pid: u32) -> Result<bool> {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let library_id = library_id_for(&canonical);

        let conn = self.lock_conn()?;
        let rows = conn.execute(
            "DELETE FROM instances WHERE library_id = ?1 AND pid = ?2",
            params![library_id, expected_pid],
        )?;

        if rows > 0 {
            debug!("Cleared instance entry for {}", canonical.display());
        }

        Ok(rows > 0)
    }

    // ========================================
    // Library read-backs and maintenance
    // ========================================

    /// Get the library entry for a root, if one was ever registered.
    pub fn get_library(&self, path: &Path) -> Result<Option<LibraryEntry>> {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let library_id = library_id_for(&canonical);

        let conn = self.lock_conn()?;
        let result = conn
            .query_row(
                "SELECT library_id, path, created_at
                 FROM libraries WHERE library_id = ?1",
                params![library_id],
                |row| {
                    Ok(LibraryEntry {
                        library_id: row.get(0)?,
                        path: PathBuf::from(row.get::<_, String>(1)?),
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    /// List all registered library roots.
    pub fn list_libraries(&self) -> Result<Vec<LibraryEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT library_id, path, created_at
             FROM libraries ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(LibraryEntry {
                library_id: row.get(0)?,
                path: PathBuf::from(row.get::<_, String>(1)?),
                created_at: row.get(2)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    /// Explicit maintenance sweep: remove instance rows whose PID is dead.
    ///
    /// Never run automatically — the resolver detects death by connection
    /// probing, not by scanning. Library rows are kept; they are superseded,
    /// not expired.
    pub fn cleanup_stale(&self) -> Result<usize> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare("SELECT library_id, pid FROM instances")?;
        let entries: Vec<(String, u32)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut removed = 0;
        for (library_id, pid) in &entries {
            if !platform::is_process_alive(*pid) {
                conn.execute(
                    "DELETE FROM instances WHERE library_id = ?1",
                    params![library_id],
                )?;
                removed += 1;
                debug!("Cleaned up stale instance: PID {} (dead)", pid);
            }
        }

        Ok(removed)
    }
}
