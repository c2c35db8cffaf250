//! Global instance registry for cross-process owner discovery.
//!
//! This module provides a SQLite-backed registry that stores:
//! - **Library entries**: Known library root paths, keyed by a stable id
//!   derived from the canonical path
//! - **Instance entries**: The currently-believed-live owner of each
//!   library root (PID, port)
//!
//! The registry is the only resource mutated across processes; it is what
//! lets independent host processes converge on a single Primary per
//! library root.
//!
//! # Location
//!
//! The registry database lives at a platform-standard config directory:
//! - **Linux**: `~/.config/sett/registry.db`
//! - **Windows**: `%APPDATA%\sett\registry.db`
//! - **macOS**: `~/Library/Application Support/sett/registry.db`

pub mod instance_registry;

pub use instance_registry::{InstanceEntry, InstanceRegistry, LibraryEntry, RegisterOutcome};
