//! How a request reaches the dispatcher: over the profile socket, or in-process.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time};

use super::{
   dispatcher::Dispatcher,
   frame::SocketBuffer,
   protocol::{RpcRequest, RpcResponse},
};
use crate::{
   Result,
   error::{Error, IpcError},
   usock,
};

#[async_trait]
pub trait Transport: Send + Sync {
   async fn send(&self, request: RpcRequest) -> Result<RpcResponse>;
}

struct Connection {
   stream: usock::Stream,
   buffer: SocketBuffer,
}

/// Talks to the background process over its Unix socket.
///
/// The connection is taken out of its slot for the duration of an exchange,
/// so an abandoned call drops it instead of leaving a stale reply behind.
pub struct SocketTransport {
   profile:           String,
   connect_timeout:   Duration,
   max_message_bytes: usize,
   conn:              Mutex<Option<Connection>>,
}

impl SocketTransport {
   pub fn new(
      profile: impl Into<String>,
      connect_timeout: Duration,
      max_message_bytes: usize,
   ) -> Self {
      Self {
         profile: profile.into(),
         connect_timeout,
         max_message_bytes,
         conn: Mutex::new(None),
      }
   }

   async fn connect(&self) -> Result<Connection> {
      let stream = time::timeout(self.connect_timeout, usock::connect(&self.profile))
         .await
         .map_err(|_| Error::Server {
            op:     "connect",
            reason: format!("timed out after {}ms", self.connect_timeout.as_millis()),
         })??;
      Ok(Connection { stream, buffer: SocketBuffer::with_limit(self.max_message_bytes) })
   }
}

#[async_trait]
impl Transport for SocketTransport {
   async fn send(&self, request: RpcRequest) -> Result<RpcResponse> {
      let mut slot = self.conn.lock().await;
      let mut conn = match slot.take() {
         Some(conn) => conn,
         None => self.connect().await?,
      };

      conn.buffer.send(&mut conn.stream, &request).await?;
      let response: RpcResponse = conn
         .buffer
         .recv(&mut conn.stream)
         .await?
         .ok_or(Error::UnexpectedResponse("connection closed"))?;
      if response.id() != request.id {
         return Err(IpcError::IdMismatch {
            expected: request.id,
            actual:   response.id().to_string(),
         }
         .into());
      }

      *slot = Some(conn);
      Ok(response)
   }
}

/// Hands requests straight to a dispatcher in the same process.
pub struct LocalTransport {
   dispatcher: Arc<Dispatcher>,
}

impl LocalTransport {
   pub const fn new(dispatcher: Arc<Dispatcher>) -> Self {
      Self { dispatcher }
   }
}

#[async_trait]
impl Transport for LocalTransport {
   async fn send(&self, request: RpcRequest) -> Result<RpcResponse> {
      Ok(self.dispatcher.dispatch(request).await)
   }
}
