//! Data contract exchanged between a host and a backend.
//!
//! These types carry no transport behavior; the same values are used whether
//! the backend runs in-process or behind a plugin connection.

pub mod backend;
pub mod logger;
pub mod paths;
pub mod request;
pub mod response;
pub mod storage;
pub mod system;
pub mod value;

pub use backend::{Backend, BackendConfig, ExistenceCheck, Factory};
pub use logger::{LogLevel, Logger};
pub use paths::PathSpec;
pub use request::{InitializationRequest, Operation, Request};
pub use response::{Auth, Response, Secret};
pub use storage::{InmemStorage, Storage, StorageEntry};
pub use system::{StaticSystemView, SystemView};
pub use value::{Map, Value};
