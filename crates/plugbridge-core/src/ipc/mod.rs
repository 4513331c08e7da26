//! Plugin IPC transport.
//!
//! Length-prefixed JSON-RPC 2.0 over TCP (or any in-memory byte stream). One
//! long-lived connection carries every call between a host and a plugin, in
//! both directions.
//!
//! # Architecture
//!
//! - **Connection**: symmetric multiplexed peer; either side calls, either side serves
//! - **Server**: runs in the plugin process, accepts host connections
//! - **Client**: connects the host to a plugin's server
//! - **Protocol**: shared framing and JSON-RPC types used by all of the above

pub mod client;
pub mod connection;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use connection::{CallOptions, InboundCall, IpcConnection, IpcDispatch, IpcPeer, NoDispatch};
pub use protocol::{IpcError, IpcRequest, IpcResponse};
pub use server::{DispatchFactory, IpcServer, IpcServerHandle};
