//! Request/response envelopes shared by both processes.
//!
//! JSON-RPC flavoured: a request names a method and carries positional
//! arguments; a response carries either `result` or a structured `error`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

pub const PROTOCOL_VERSION: u32 = 1;

/// Transport error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrorCode {
   Timeout,
   MethodNotFound,
   InvalidParams,
   InternalError,
   TransactionFailed,
   Other(i32),
}

impl ErrorCode {
   pub const fn code(self) -> i32 {
      match self {
         Self::Timeout => -32000,
         Self::MethodNotFound => -32601,
         Self::InvalidParams => -32602,
         Self::InternalError => -32603,
         Self::TransactionFailed => -32001,
         Self::Other(code) => code,
      }
   }

   pub const fn name(self) -> &'static str {
      match self {
         Self::Timeout => "TIMEOUT",
         Self::MethodNotFound => "METHOD_NOT_FOUND",
         Self::InvalidParams => "INVALID_PARAMS",
         Self::InternalError => "INTERNAL_ERROR",
         Self::TransactionFailed => "TRANSACTION_FAILED",
         Self::Other(_) => "UNKNOWN",
      }
   }
}

impl From<i32> for ErrorCode {
   fn from(code: i32) -> Self {
      match code {
         -32000 => Self::Timeout,
         -32601 => Self::MethodNotFound,
         -32602 => Self::InvalidParams,
         -32603 => Self::InternalError,
         -32001 => Self::TransactionFailed,
         other => Self::Other(other),
      }
   }
}

impl From<ErrorCode> for i32 {
   fn from(code: ErrorCode) -> Self {
      code.code()
   }
}

impl fmt::Display for ErrorCode {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{} {}", self.code(), self.name())
   }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
   /// Milliseconds the caller is willing to wait.
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub timeout:  Option<u64>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
   pub id:     String,
   pub method: String,
   #[serde(default)]
   pub args:   Vec<Value>,
   #[serde(default)]
   pub meta:   RequestMeta,
}

impl RpcRequest {
   pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
      Self {
         id: uuid::Uuid::new_v4().to_string(),
         method: method.into(),
         args,
         meta: RequestMeta::default(),
      }
   }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
   pub code:    ErrorCode,
   pub message: String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub data:    Option<Value>,
}

impl From<RpcErrorBody> for RpcError {
   fn from(body: RpcErrorBody) -> Self {
      Self { code: body.code, message: body.message, data: body.data }
   }
}

impl From<RpcError> for RpcErrorBody {
   fn from(err: RpcError) -> Self {
      Self { code: err.code, message: err.message, data: err.data }
   }
}

/// Either a result or an error, never both. `Failure` is tried first so an
/// envelope carrying `error` never decodes as a null result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
   Failure {
      id:    String,
      error: RpcErrorBody,
   },
   Success {
      id:     String,
      #[serde(default)]
      result: Value,
   },
}

impl RpcResponse {
   pub fn success(id: impl Into<String>, result: Value) -> Self {
      Self::Success { id: id.into(), result }
   }

   pub fn failure(id: impl Into<String>, error: impl Into<RpcErrorBody>) -> Self {
      Self::Failure { id: id.into(), error: error.into() }
   }

   pub fn id(&self) -> &str {
      match self {
         Self::Failure { id, .. } | Self::Success { id, .. } => id,
      }
   }

   pub fn into_result(self) -> Result<Value, RpcError> {
      match self {
         Self::Success { result, .. } => Ok(result),
         Self::Failure { error, .. } => Err(error.into()),
      }
   }
}

#[cfg(test)]
mod tests {
   use serde_json::json;

   use super::*;

   #[test]
   fn codes_serialize_as_integers() {
      let body = RpcErrorBody {
         code:    ErrorCode::MethodNotFound,
         message: "nope".into(),
         data:    None,
      };
      assert_eq!(
         serde_json::to_value(&body).expect("encode"),
         json!({"code": -32601, "message": "nope"})
      );
      assert_eq!(ErrorCode::from(-32001), ErrorCode::TransactionFailed);
      assert_eq!(ErrorCode::from(-1), ErrorCode::Other(-1));
   }

   #[test]
   fn responses_decode_by_shape() {
      let ok: RpcResponse = serde_json::from_value(json!({"id": "1", "result": null})).expect("ok");
      assert_eq!(ok.clone().into_result(), Ok(Value::Null));

      let err: RpcResponse = serde_json::from_value(json!({
         "id": "2",
         "error": {"code": -32000, "message": "slow"}
      }))
      .expect("err");
      assert_eq!(err.id(), "2");
      let err = err.into_result().expect_err("failure");
      assert_eq!(err.code, ErrorCode::Timeout);
   }

   #[test]
   fn request_meta_uses_wire_names() {
      let mut req = RpcRequest::new("tags.list", vec![]);
      req.meta = RequestMeta { timeout: Some(5000), trace_id: Some("t".into()) };
      let value = serde_json::to_value(&req).expect("encode");
      assert_eq!(value["meta"], json!({"timeout": 5000, "traceId": "t"}));
   }
}
