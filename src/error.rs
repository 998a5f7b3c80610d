use std::{io, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::{rpc::protocol::ErrorCode, usock::SocketError};

/// Main error type for marksync.
///
/// Local store validation, key-value persistence, remote replication, the
/// process-to-process transport, and configuration all funnel into this enum
/// so callers can classify a failure without knowing which layer produced it.
#[derive(Debug, Error)]
pub enum Error {
   /// Shared error (moka).
   #[error(transparent)]
   Shared(#[from] Arc<Self>),

   /// I/O error occurred during file or socket operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// Bad input rejected before touching any state.
   #[error("validation error: {0}")]
   Validation(#[from] ValidationError),

   /// Local persistence failed.
   #[error("storage error: {0}")]
   Storage(#[from] StorageError),

   /// The remote store rejected or failed a request.
   #[error("remote error: {0}")]
   Remote(#[from] RemoteError),

   /// Structured error returned by the other process.
   #[error("rpc error: {0}")]
   Rpc(#[from] RpcError),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// JSON serialization or deserialization error occurred.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// Inter-process framing error occurred.
   #[error("ipc error: {0}")]
   Ipc(#[from] IpcError),

   /// Socket communication error occurred.
   #[error("socket error: {0}")]
   Socket(#[from] SocketError),

   /// Merging or applying a pulled dataset failed.
   #[error("transaction failed during {stage}: {reason}")]
   Transaction { stage: &'static str, reason: String },

   /// Server error occurred during a specific operation.
   #[error("server error during {op}: {reason}")]
   Server { op: &'static str, reason: String },

   /// Unexpected response received from the server during an operation.
   #[error("unexpected response from server during {0}")]
   UnexpectedResponse(&'static str),
}

impl Error {
   /// Whether retrying the same operation later can reasonably succeed.
   pub fn is_retryable(&self) -> bool {
      match self {
         Self::Shared(inner) => inner.is_retryable(),
         Self::Io(_) | Self::Socket(_) => true,
         Self::Ipc(IpcError::Read(_) | IpcError::Write(_)) => true,
         Self::Remote(err) => err.is_retryable(),
         Self::Rpc(err) => err.is_retryable(),
         Self::Storage(StorageError::Read { .. } | StorageError::Write { .. }) => true,
         _ => false,
      }
   }

   /// Persistent failures the user has to act on (sign in again, free quota).
   pub fn needs_attention(&self) -> bool {
      match self {
         Self::Shared(inner) => inner.needs_attention(),
         Self::Remote(RemoteError::Unauthorized(_) | RemoteError::QuotaExceeded(_)) => true,
         _ => false,
      }
   }

   /// Transport error code used when this error crosses the process boundary.
   pub fn rpc_code(&self) -> ErrorCode {
      match self {
         Self::Shared(inner) => inner.rpc_code(),
         Self::Validation(_) => ErrorCode::InvalidParams,
         Self::Transaction { .. } => ErrorCode::TransactionFailed,
         Self::Rpc(err) => err.code,
         _ => ErrorCode::InternalError,
      }
   }

   pub fn exit_code(&self) -> i32 {
      match self {
         Self::Shared(inner) => inner.exit_code(),
         Self::Validation(_) => 2,
         Self::Rpc(err) if err.code == ErrorCode::InvalidParams => 2,
         Self::Rpc(err) if err.code == ErrorCode::Timeout => 11,
         other => {
            let reason = other.to_string().to_lowercase();
            if reason.contains("busy") || reason.contains("already running") {
               10
            } else if reason.contains("timeout") || reason.contains("timed out") {
               11
            } else {
               1
            }
         },
      }
   }
}

/// Input rejected by the local store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
   #[error("tag name must not be empty")]
   EmptyTagName,

   #[error("tag name exceeds {max} characters ({len})")]
   TagNameTooLong { len: usize, max: usize },

   #[error("a tag cannot be bound to itself")]
   SelfBinding,

   #[error("invalid url: {0}")]
   InvalidUrl(String),

   #[error("invalid params: {0}")]
   InvalidParams(String),
}

/// Errors raised by a key-value backend.
#[derive(Debug, Error)]
pub enum StorageError {
   #[error("failed to read {key}: {reason}")]
   Read { key: String, reason: String },

   #[error("failed to write {key}: {reason}")]
   Write { key: String, reason: String },

   #[error("corrupt value under {key}: {source}")]
   Corrupt {
      key:    String,
      #[source]
      source: serde_json::Error,
   },
}

/// Errors raised by the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
   /// Remote is unreachable (no network, offline mode, connection refused).
   #[error("remote offline: {0}")]
   Offline(String),

   /// Credentials rejected.
   #[error("unauthorized: {0}")]
   Unauthorized(String),

   /// Storage quota or payload limit exceeded.
   #[error("quota exceeded: {0}")]
   QuotaExceeded(String),

   /// Transient server-side failure (5xx, rate limiting).
   #[error("remote unavailable (HTTP {status}): {body}")]
   Unavailable { status: u16, body: String },

   /// Any other non-success response.
   #[error("remote rejected request (HTTP {status}): {body}")]
   Rejected { status: u16, body: String },

   #[error("request failed: {0}")]
   Request(#[from] reqwest::Error),

   /// No answer within the configured remote timeout.
   #[error("remote {op} timed out after {ms}ms")]
   TimedOut { op: &'static str, ms: u64 },

   #[error("malformed row in {table}: {reason}")]
   MalformedRow { table: &'static str, reason: String },
}

impl RemoteError {
   pub fn is_retryable(&self) -> bool {
      match self {
         Self::Offline(_) | Self::Unavailable { .. } | Self::TimedOut { .. } => true,
         Self::Request(err) => err.is_timeout() || err.is_connect(),
         _ => false,
      }
   }

   /// Maps a non-success HTTP status to the matching variant.
   pub fn from_status(status: u16, body: String) -> Self {
      match status {
         401 | 403 => Self::Unauthorized(body),
         402 | 413 | 507 => Self::QuotaExceeded(body),
         429 | 500..=599 => Self::Unavailable { status, body },
         _ => Self::Rejected { status, body },
      }
   }
}

/// Structured error carried across the process boundary.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} (code {code})")]
pub struct RpcError {
   pub code:    ErrorCode,
   pub message: String,
   pub data:    Option<Value>,
}

impl RpcError {
   pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
      Self { code, message: message.into(), data: None }
   }

   pub fn with_data(mut self, data: Value) -> Self {
      self.data = Some(data);
      self
   }

   pub fn is_retryable(&self) -> bool {
      matches!(self.code, ErrorCode::Timeout)
         || self
            .data
            .as_ref()
            .and_then(|d| d.get("retryable"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
   }
}

/// Errors that can occur during inter-process communication (IPC).
///
/// These errors are related to message framing, serialization, and I/O
/// when the foreground client talks to the background process.
#[derive(Debug, Error)]
pub enum IpcError {
   /// The message size exceeds the maximum allowed size.
   #[error("message too large: {0} bytes")]
   MessageTooLarge(usize),

   /// Failed to serialize a message for IPC transmission.
   #[error("failed to serialize: {0}")]
   Serialize(#[source] serde_json::Error),

   /// Failed to deserialize a message received via IPC.
   #[error("failed to deserialize: {0}")]
   Deserialize(#[source] serde_json::Error),

   /// Failed to read data from the IPC channel.
   #[error("failed to read: {0}")]
   Read(#[source] io::Error),

   /// Failed to write data to the IPC channel.
   #[error("failed to write: {0}")]
   Write(#[source] io::Error),

   /// The response id did not match the request id.
   #[error("response id mismatch (expected {expected}, got {actual})")]
   IdMismatch { expected: String, actual: String },
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// Config value is out of range.
   #[error("invalid config: {0}")]
   Invalid(String),

   /// Remote URL could not be parsed.
   #[error("invalid remote url {url}: {source}")]
   RemoteUrl {
      url:    String,
      #[source]
      source: url::ParseError,
   },
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn remote_status_classification() {
      assert!(matches!(RemoteError::from_status(401, String::new()), RemoteError::Unauthorized(_)));
      assert!(matches!(
         RemoteError::from_status(507, String::new()),
         RemoteError::QuotaExceeded(_)
      ));
      assert!(RemoteError::from_status(503, String::new()).is_retryable());
      assert!(!RemoteError::from_status(404, String::new()).is_retryable());
   }

   #[test]
   fn validation_maps_to_invalid_params() {
      let err = Error::from(ValidationError::EmptyTagName);
      assert_eq!(err.rpc_code(), ErrorCode::InvalidParams);
      assert!(!err.is_retryable());
      assert_eq!(err.exit_code(), 2);
   }

   #[test]
   fn auth_failures_need_attention() {
      let err = Error::from(RemoteError::Unauthorized("expired".into()));
      assert!(err.needs_attention());
      assert!(!err.is_retryable());
   }
}
