//! Process-to-process calls: envelopes, framing, transports, client, and
//! dispatcher.

pub mod client;
pub mod dispatcher;
pub mod frame;
pub mod methods;
pub mod protocol;
pub mod transport;

pub use client::Client;
pub use dispatcher::{Dispatcher, FromArgs};
pub use frame::SocketBuffer;
pub use methods::{Hello, register_all};
pub use protocol::{ErrorCode, PROTOCOL_VERSION, RpcErrorBody, RpcRequest, RpcResponse};
pub use transport::{LocalTransport, SocketTransport, Transport};
