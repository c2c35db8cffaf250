//! Sett - cross-process coordination for a shared application-data library.
//!
//! Several independent host processes (a desktop shell, a CLI, binding
//! consumers, test harnesses) may embed the same library root at once, but
//! only one process may safely own the authoritative on-disk state. This
//! crate elects that owner and lets everyone else delegate to it
//! transparently:
//!
//! - **Registry**: a SQLite database at a well-known per-user location
//!   records each library root and its currently-believed-live owner
//!   `(pid, port)`.
//! - **IPC**: length-prefixed JSON-RPC 2.0 over loopback TCP connects
//!   Clients to the Primary's server.
//! - **Resolver**: decides Primary vs. Client at startup and re-runs the
//!   same election for promotion after the owner disappears.
//!
//! The content of individual RPC methods is not defined here; the host
//! supplies an [`IpcDispatch`] capability and this crate routes to it.
//!
//! # Example
//!
//! ```rust,ignore
//! use sett_library::{resolve_role, CoordinationConfig, Role};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sett_library::Result<()> {
//!     let config = Arc::new(CoordinationConfig::default());
//!     let dispatch = Arc::new(MyLibraryDispatch::new());
//!
//!     match resolve_role("/data/lib", dispatch.clone(), config.clone()).await? {
//!         Role::Primary(primary) => {
//!             // Keep `primary` alive; serve until shutdown.
//!             println!("Primary on port {}", primary.port());
//!         }
//!         Role::Client(client) => {
//!             let models = client.call("list_models", serde_json::json!({})).await;
//!             // On SharedInstanceLost: re-run resolve_role to promote.
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod registry;
pub mod resolver;

// Re-export commonly used types
pub use config::{CoordinationConfig, RegistryConfig};
pub use error::{Result, SettError};
pub use ipc::{IpcClient, IpcDispatch, IpcRequest, IpcResponse, IpcServer, IpcServerHandle};
pub use registry::{InstanceEntry, InstanceRegistry, LibraryEntry, RegisterOutcome};
pub use resolver::{resolve_role, ClientHandle, PrimaryHandle, Role};
