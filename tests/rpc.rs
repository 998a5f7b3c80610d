mod support;

use std::{sync::Arc, time::Duration};

use marksync::{
   Error,
   cmd::serve::{build_dispatcher, handle_connection},
   error::RpcError,
   local_store::PageInput,
   rpc::{
      Client, Dispatcher, ErrorCode, LocalTransport, PROTOCOL_VERSION, RpcRequest, RpcResponse,
      SocketBuffer, SocketTransport,
   },
   usock,
};
use serde_json::json;
use support::Harness;
use tokio::{net::UnixStream, time::Instant};

fn local_client(dispatcher: Dispatcher, timeout: Duration) -> Client {
   Client::new(Arc::new(LocalTransport::new(Arc::new(dispatcher))), timeout)
}

fn app_client(h: &Harness) -> Client {
   local_client(build_dispatcher(&h.app), Duration::from_secs(5))
}

fn rpc_error(err: Error) -> RpcError {
   match err {
      Error::Rpc(e) => e,
      other => panic!("expected an rpc error, got {other:?}"),
   }
}

#[tokio::test(start_paused = true)]
async fn silent_handler_times_out_at_the_deadline() {
   let mut d = Dispatcher::new(false);
   d.register("never.returns", |(): ()| async {
      std::future::pending::<()>().await;
      Ok::<_, Error>(())
   });
   let client = local_client(d, Duration::from_millis(5000));

   let start = Instant::now();
   let err = client.invoke("never.returns", vec![]).await.expect_err("times out");
   let elapsed = start.elapsed();

   let err = rpc_error(err);
   assert_eq!(err.code, ErrorCode::Timeout);
   assert_eq!(err.code.name(), "TIMEOUT");
   assert!(elapsed >= Duration::from_millis(5000), "too early: {elapsed:?}");
   assert!(elapsed < Duration::from_millis(5050), "too late: {elapsed:?}");
}

#[tokio::test]
async fn unknown_method_is_reported() {
   let h = Harness::new();
   let err = app_client(&h).invoke("tags.explode", vec![]).await.expect_err("unknown");
   let err = rpc_error(err);
   assert_eq!(err.code, ErrorCode::MethodNotFound);
   assert_eq!(err.code.code(), -32601);
}

#[tokio::test]
async fn validation_failures_are_invalid_params() {
   let h = Harness::new();
   let client = app_client(&h);

   let err = rpc_error(client.create_tag("   ").await.expect_err("empty name"));
   assert_eq!(err.code.code(), -32602);
   assert!(err.message.contains("empty"));

   let err = rpc_error(client.invoke("tags.create", vec![json!(42)]).await.expect_err("bad arg"));
   assert_eq!(err.code, ErrorCode::InvalidParams);
}

#[tokio::test]
async fn domain_calls_round_trip() {
   let h = Harness::new();
   let client = app_client(&h);

   let hello = client.hello().await.expect("hello");
   assert_eq!(hello.protocol_version, PROTOCOL_VERSION);

   let tag = client.create_tag("  Front   end ").await.expect("tag");
   assert_eq!(tag.name, "Front end");
   let page = client
      .upsert_page(&PageInput {
         url: "https://example.com/a".to_string(),
         title: "A".to_string(),
         ..PageInput::default()
      })
      .await
      .expect("page");
   assert!(client.add_tag_to_page(&page.id, &tag.id).await.expect("add"));

   let tagged = client.pages_by_tag(&tag.id).await.expect("by tag");
   assert_eq!(tagged.len(), 1);
   let listed = client.list_tags().await.expect("list");
   assert_eq!(listed.len(), 1);
   assert_eq!(listed[0].usage_count, 1);

   let stats = client.user_stats().await.expect("stats");
   assert_eq!(stats.total_pages, 1);
   assert_eq!(stats.total_tags, 1);

   assert!(client.delete_tag(&tag.id).await.expect("delete"));
   assert!(client.get_tag(&tag.id).await.expect("get").is_none());

   let status = client.sync_status().await.expect("status");
   assert!(!status.authenticated);
   assert!(status.pending_changes > 0);
}

#[tokio::test]
async fn requests_travel_over_the_profile_socket() {
   let home = tempfile::tempdir().expect("tempdir");
   // SAFETY: set before anything in this test binary resolves config paths.
   unsafe {
      std::env::set_var("MARKSYNC_HOME", home.path());
   }
   let profile = "rpc-socket-test";

   let h = Harness::new();
   let dispatcher = Arc::new(build_dispatcher(&h.app));
   let listener = usock::Listener::bind(profile).await.expect("bind");
   let server = tokio::spawn(async move {
      let stream = listener.accept().await.expect("accept");
      handle_connection(&dispatcher, stream, 1024 * 1024).await
   });

   let transport = SocketTransport::new(profile, Duration::from_millis(500), 1024 * 1024);
   let client = Client::new(Arc::new(transport), Duration::from_secs(5));

   let tag = client.create_tag("over the wire").await.expect("create");
   assert_eq!(client.get_tag(&tag.id).await.expect("get"), Some(tag));
   assert!(client.shutdown().await.expect("shutdown"));
   assert!(server.await.expect("join"), "shutdown should be reported");
}

#[tokio::test]
async fn undecodable_frames_get_an_invalid_params_reply() {
   let h = Harness::new();
   let dispatcher = build_dispatcher(&h.app);
   let (server_side, mut client_side) = UnixStream::pair().expect("pair");
   let server =
      tokio::spawn(async move { handle_connection(&dispatcher, server_side, 1024 * 1024).await });

   let mut buffer = SocketBuffer::new();
   buffer
      .send(&mut client_side, &json!({ "method": "tags.list" }))
      .await
      .expect("send");
   let reply: RpcResponse = buffer.recv(&mut client_side).await.expect("recv").expect("reply");
   assert_eq!(reply.id(), "");
   let err = reply.into_result().expect_err("missing id is rejected");
   assert_eq!(err.code, ErrorCode::InvalidParams);

   // The connection keeps serving well-formed requests.
   let request = RpcRequest::new("tags.list", vec![]);
   buffer.send(&mut client_side, &request).await.expect("send");
   let reply: RpcResponse = buffer.recv(&mut client_side).await.expect("recv").expect("reply");
   assert_eq!(reply.id(), request.id);
   assert!(reply.into_result().is_ok());

   drop(client_side);
   assert!(!server.await.expect("join"));
}
