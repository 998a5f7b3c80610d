//! Method registry and request dispatch in the background process.

use std::{collections::HashMap, error::Error as StdError, future::Future, sync::Arc};

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::Instrument;

use super::protocol::{ErrorCode, RpcErrorBody, RpcRequest, RpcResponse};
use crate::{
   Result,
   error::{Error, RpcError, ValidationError},
};

type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Positional arguments decoded from the request's `args` array.
///
/// Missing trailing arguments decode from `null`, so `Option` parameters
/// may be omitted. Extra arguments are rejected.
pub trait FromArgs: Sized {
   fn from_args(args: Vec<Value>) -> Result<Self>;
}

fn too_many(expected: usize, got: usize) -> Error {
   ValidationError::InvalidParams(format!("expected at most {expected} arguments, got {got}"))
      .into()
}

impl FromArgs for () {
   fn from_args(args: Vec<Value>) -> Result<Self> {
      if !args.is_empty() {
         return Err(too_many(0, args.len()));
      }
      Ok(())
   }
}

macro_rules! impl_from_args {
   ($len:literal => $($name:ident),+) => {
      impl<$($name: DeserializeOwned),+> FromArgs for ($($name,)+) {
         fn from_args(mut args: Vec<Value>) -> Result<Self> {
            if args.len() > $len {
               return Err(too_many($len, args.len()));
            }
            args.resize($len, Value::Null);
            let mut iter = args.into_iter().enumerate();
            Ok(($({
               let (idx, value) = iter.next().unwrap_or_default();
               serde_json::from_value::<$name>(value).map_err(|e| {
                  ValidationError::InvalidParams(format!("argument {idx}: {e}"))
               })?
            },)+))
         }
      }
   };
}

impl_from_args!(1 => A);
impl_from_args!(2 => A, B);
impl_from_args!(3 => A, B, C);

pub struct Dispatcher {
   handlers:        HashMap<String, Handler>,
   include_details: bool,
}

impl Dispatcher {
   /// `include_details` adds the error source chain to error payloads.
   pub fn new(include_details: bool) -> Self {
      Self { handlers: HashMap::new(), include_details }
   }

   /// Registers a typed handler. Arguments decode through [`FromArgs`] and the
   /// result is serialized to JSON.
   pub fn register<A, R, F, Fut>(&mut self, method: &str, handler: F)
   where
      A: FromArgs + Send + 'static,
      R: Serialize + Send + 'static,
      F: Fn(A) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = Result<R>> + Send + 'static,
   {
      let handler = Arc::new(handler);
      let erased: Handler = Arc::new(move |args| {
         let handler = Arc::clone(&handler);
         Box::pin(async move {
            let args = A::from_args(args)?;
            let result = handler(args).await?;
            Ok(serde_json::to_value(result)?)
         })
      });
      if self.handlers.insert(method.to_string(), erased).is_some() {
         tracing::warn!(method, "handler replaced");
      }
   }

   pub fn has_method(&self, method: &str) -> bool {
      self.handlers.contains_key(method)
   }

   pub fn methods(&self) -> Vec<&str> {
      let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
      names.sort_unstable();
      names
   }

   /// Runs the named handler and wraps its outcome in a response envelope.
   pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
      let RpcRequest { id, method, args, meta } = request;
      let span = tracing::info_span!(
         "rpc",
         %method,
         trace_id = meta.trace_id.as_deref().unwrap_or("-"),
      );

      async {
         let Some(handler) = self.handlers.get(&method) else {
            tracing::debug!("unknown method");
            let err =
               RpcError::new(ErrorCode::MethodNotFound, format!("method not found: {method}"));
            return RpcResponse::failure(id, err);
         };

         match handler(args).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => {
               let body = self.error_body(&e);
               if body.code == ErrorCode::InvalidParams {
                  tracing::debug!("handler rejected params: {e}");
               } else {
                  tracing::warn!("handler failed: {e}");
               }
               RpcResponse::failure(id, body)
            },
         }
      }
      .instrument(span)
      .await
   }

   fn error_body(&self, err: &Error) -> RpcErrorBody {
      let code = err.rpc_code();
      let mut data = match err {
         Error::Rpc(inner) => inner.data.clone(),
         _ => None,
      };
      if err.is_retryable() || err.needs_attention() {
         let extra = data.get_or_insert_with(|| json!({}));
         if let Some(obj) = extra.as_object_mut() {
            obj.insert("retryable".to_string(), Value::Bool(err.is_retryable()));
            obj.insert("needsAttention".to_string(), Value::Bool(err.needs_attention()));
         }
      }
      if self.include_details {
         let mut stack = Vec::new();
         let mut source = StdError::source(err);
         while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
         }
         let extra = data.get_or_insert_with(|| json!({}));
         if let Some(obj) = extra.as_object_mut() {
            obj.insert("stack".to_string(), json!(stack));
         }
      }
      RpcErrorBody { code, message: err.to_string(), data }
   }
}
