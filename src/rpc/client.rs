//! Typed foreground client over a single `invoke(method, args)` primitive.

use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time;

use super::{
   methods::Hello,
   protocol::{ErrorCode, RequestMeta, RpcRequest},
   transport::{SocketTransport, Transport},
};
use crate::{
   Result,
   config::Config,
   error::{IpcError, RpcError},
   local_store::{PageInput, TagPatch},
   retry::{RetryPolicy, retry_with_backoff},
   sync::{SyncReport, SyncStatus},
   types::{Page, Tag, TagWithUsage, TitleSource, UserStats},
};

pub struct Client {
   transport: Arc<dyn Transport>,
   timeout:   Duration,
   retry:     RetryPolicy,
}

impl Client {
   pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
      Self { transport, timeout, retry: RetryPolicy::none() }
   }

   /// Socket client for the configured profile.
   pub fn connect(cfg: &Config) -> Self {
      let transport = SocketTransport::new(
         cfg.profile.clone(),
         cfg.connect_timeout(),
         cfg.effective_max_message_bytes(),
      );
      Self::new(Arc::new(transport), cfg.rpc_timeout()).with_retry(RetryPolicy::from_config(cfg))
   }

   pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
      self.retry = retry;
      self
   }

   pub const fn timeout(&self) -> Duration {
      self.timeout
   }

   /// Sends one request and waits at most the configured timeout.
   ///
   /// A timed-out call is abandoned locally; the other side may still finish
   /// it.
   pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
      let mut request = RpcRequest::new(method, args);
      let trace_id = uuid::Uuid::new_v4().to_string();
      request.meta = RequestMeta {
         timeout:  Some(self.timeout.as_millis() as u64),
         trace_id: Some(trace_id.clone()),
      };
      let id = request.id.clone();

      let response = time::timeout(self.timeout, self.transport.send(request))
         .await
         .map_err(|_| {
            tracing::warn!(method, %trace_id, "call timed out");
            RpcError::new(
               ErrorCode::Timeout,
               format!("{method} timed out after {}ms", self.timeout.as_millis()),
            )
            .with_data(json!({ "retryable": true, "method": method }))
         })??;

      if response.id() != id {
         return Err(IpcError::IdMismatch { expected: id, actual: response.id().to_string() }.into());
      }
      Ok(response.into_result()?)
   }

   /// [`Client::invoke`] with the client's retry policy for retryable failures.
   pub async fn invoke_with_retry(&self, method: &str, args: Vec<Value>) -> Result<Value> {
      retry_with_backoff(&self.retry, || self.invoke(method, args.clone())).await
   }

   pub async fn call<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
      let value = self.invoke_with_retry(method, args).await?;
      Ok(serde_json::from_value(value)?)
   }

   async fn mutate<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
      let value = self.invoke(method, args).await?;
      Ok(serde_json::from_value(value)?)
   }

   pub async fn hello(&self) -> Result<Hello> {
      self.call("system.hello", vec![]).await
   }

   pub async fn shutdown(&self) -> Result<bool> {
      self.mutate("system.shutdown", vec![]).await
   }

   pub async fn create_tag(&self, name: &str) -> Result<Tag> {
      self.mutate("tags.create", vec![json!(name)]).await
   }

   pub async fn update_tag(&self, id: &str, patch: &TagPatch) -> Result<Option<Tag>> {
      self.mutate("tags.update", vec![json!(id), serde_json::to_value(patch)?]).await
   }

   pub async fn delete_tag(&self, id: &str) -> Result<bool> {
      self.mutate("tags.delete", vec![json!(id)]).await
   }

   pub async fn bind_tags(&self, a: &str, b: &str) -> Result<bool> {
      self.mutate("tags.bind", vec![json!(a), json!(b)]).await
   }

   pub async fn unbind_tags(&self, a: &str, b: &str) -> Result<bool> {
      self.mutate("tags.unbind", vec![json!(a), json!(b)]).await
   }

   pub async fn list_tags(&self) -> Result<Vec<TagWithUsage>> {
      self.call("tags.list", vec![]).await
   }

   pub async fn get_tag(&self, id: &str) -> Result<Option<Tag>> {
      self.call("tags.get", vec![json!(id)]).await
   }

   pub async fn bound_tags(&self, id: &str) -> Result<Vec<Tag>> {
      self.call("tags.bound", vec![json!(id)]).await
   }

   pub async fn upsert_page(&self, input: &PageInput) -> Result<Page> {
      self.mutate("pages.upsert", vec![serde_json::to_value(input)?]).await
   }

   pub async fn delete_page(&self, id: &str) -> Result<bool> {
      self.mutate("pages.delete", vec![json!(id)]).await
   }

   pub async fn list_pages(&self) -> Result<Vec<Page>> {
      self.call("pages.list", vec![]).await
   }

   pub async fn get_page(&self, id: &str) -> Result<Option<Page>> {
      self.call("pages.get", vec![json!(id)]).await
   }

   pub async fn pages_by_tag(&self, tag_id: &str) -> Result<Vec<Page>> {
      self.call("pages.by_tag", vec![json!(tag_id)]).await
   }

   pub async fn search_pages(&self, query: &str) -> Result<Vec<Page>> {
      self.call("pages.search", vec![json!(query)]).await
   }

   pub async fn add_tag_to_page(&self, page_id: &str, tag_id: &str) -> Result<bool> {
      self.mutate("pages.add_tag", vec![json!(page_id), json!(tag_id)]).await
   }

   pub async fn remove_tag_from_page(&self, page_id: &str, tag_id: &str) -> Result<bool> {
      self.mutate("pages.remove_tag", vec![json!(page_id), json!(tag_id)]).await
   }

   pub async fn update_page_title(
      &self,
      id: &str,
      title: &str,
      source: TitleSource,
   ) -> Result<Option<Page>> {
      let args = vec![json!(id), json!(title), serde_json::to_value(source)?];
      self.mutate("pages.update_title", args).await
   }

   pub async fn user_stats(&self) -> Result<UserStats> {
      self.call("stats.user", vec![]).await
   }

   pub async fn sync_run(&self, full: bool) -> Result<SyncReport> {
      self.mutate("sync.run", vec![json!(full)]).await
   }

   pub async fn sync_status(&self) -> Result<SyncStatus> {
      self.call("sync.status", vec![]).await
   }

   pub async fn clear_data(&self) -> Result<bool> {
      self.mutate("data.clear", vec![]).await
   }
}
