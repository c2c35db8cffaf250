//! Local IPC for instance convergence.
//!
//! Provides a lightweight TCP-based IPC mechanism for transparent
//! communication between the Primary and Client instances sharing a
//! library root. Uses length-prefixed JSON-RPC 2.0 over `127.0.0.1` TCP
//! connections.
//!
//! # Architecture
//!
//! - **Server**: Runs on the Primary, accepts connections, dispatches
//!   method calls into the embedding subsystem
//! - **Client**: Connects to the Primary, proxies calls transparently
//! - **Protocol**: Shared framing and JSON-RPC types used by both

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{IpcRequest, IpcResponse};
pub use server::{IpcDispatch, IpcServer, IpcServerHandle};
