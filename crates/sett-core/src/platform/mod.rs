//! Platform abstraction layer for cross-platform compatibility.
//!
//! Centralizes the OS-specific code this crate needs: the per-user config
//! directory holding the shared registry database, and PID liveness checks
//! used to guard registration against entries left behind by dead owners.
//! All `#[cfg]` blocks for OS-specific behavior live here.

pub mod paths;
pub mod process;

pub use paths::{registry_db_path, sett_config_dir};
pub use process::is_process_alive;
