//! Page tagging with a local store, last-write-wins merge, and a background
//! sync process reachable over a Unix socket.

pub mod app;
pub mod cmd;
pub mod config;
pub mod error;
pub mod local_store;
pub mod merge;
pub mod remote;
pub mod repository;
pub mod retry;
pub mod rpc;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;
pub mod usock;
pub mod util;

pub use error::{Error, Result};
