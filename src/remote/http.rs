use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use url::Url;

use super::{RemoteRow, RemoteStore};
use crate::{error::RemoteError, session::Session};

/// PostgREST-style REST client (`/rest/v1/<table>`).
pub struct HttpRemote {
   client:     Client,
   base:       Url,
   api_key:    Option<String>,
   session:    Arc<Session>,
   timeout_ms: u64,
}

impl HttpRemote {
   /// Every request is bounded by `timeout`, connecting by `connect_timeout`.
   pub fn new(
      mut base: Url,
      api_key: Option<String>,
      session: Arc<Session>,
      timeout: Duration,
      connect_timeout: Duration,
   ) -> Result<Self, RemoteError> {
      if !base.path().ends_with('/') {
         let path = format!("{}/", base.path());
         base.set_path(&path);
      }
      let client = Client::builder()
         .timeout(timeout)
         .connect_timeout(connect_timeout)
         .build()?;
      Ok(Self { client, base, api_key, session, timeout_ms: timeout.as_millis() as u64 })
   }

   fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
      self
         .base
         .join(&format!("rest/v1/{table}"))
         .map_err(|e| RemoteError::Rejected { status: 0, body: e.to_string() })
   }

   fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
      let req = match &self.api_key {
         Some(key) => req.header("apikey", key),
         None => req,
      };
      match self.session.access_token() {
         Some(token) => req.bearer_auth(token),
         None => req,
      }
   }

   async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
      let response = self.authorize(req).send().await.map_err(|e| {
         if e.is_connect() {
            RemoteError::Offline(e.to_string())
         } else if e.is_timeout() {
            RemoteError::TimedOut { op: "request", ms: self.timeout_ms }
         } else {
            RemoteError::Request(e)
         }
      })?;
      let status = response.status();
      if status.is_success() {
         return Ok(response);
      }
      let body = response.text().await.unwrap_or_default();
      Err(RemoteError::from_status(status.as_u16(), body))
   }
}

#[async_trait]
impl RemoteStore for HttpRemote {
   async fn select(
      &self,
      table: &'static str,
      user_id: &str,
      updated_since: Option<i64>,
   ) -> Result<Vec<RemoteRow>, RemoteError> {
      let mut url = self.table_url(table)?;
      {
         let mut query = url.query_pairs_mut();
         query.append_pair("select", "*");
         query.append_pair("user_id", &format!("eq.{user_id}"));
         if let Some(since) = updated_since {
            query.append_pair("updated_at", &format!("gt.{since}"));
         }
      }
      tracing::debug!(table, ?updated_since, "remote select");
      let response = self.send(self.client.get(url)).await?;
      response.json().await.map_err(RemoteError::Request)
   }

   async fn upsert(&self, table: &'static str, rows: Vec<RemoteRow>) -> Result<(), RemoteError> {
      if rows.is_empty() {
         return Ok(());
      }
      let url = self.table_url(table)?;
      let req = self
         .client
         .post(url)
         .header("Prefer", "resolution=merge-duplicates")
         .json(&rows);
      self.send(req).await.map(drop)
   }

   async fn soft_delete(
      &self,
      table: &'static str,
      user_id: &str,
      id: &str,
      at: i64,
   ) -> Result<(), RemoteError> {
      let mut url = self.table_url(table)?;
      url.query_pairs_mut()
         .append_pair("id", &format!("eq.{id}"))
         .append_pair("user_id", &format!("eq.{user_id}"));
      let req = self
         .client
         .patch(url)
         .json(&json!({ "deleted": true, "updated_at": at }));
      self.send(req).await.map(drop)
   }
}
