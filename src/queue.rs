//! Durable queue of outbound write requests deferred for lack of connectivity.
//!
//! Entries are immutable once persisted and are removed only after a 2xx
//! delivery, so delivery is at-least-once: overlapping flushes may send the
//! same entry twice and receivers must tolerate duplicates.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ids;
use crate::platform::{Body, Clock, FetchRequest, Network, WakeScheduler, WakeTag};
use crate::store::{Collection, DurableStore, Persisted};

/// Body of a request handed to `enqueue`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutboundBody {
  Text(String),
  /// Structured value, serialized to JSON text on enqueue
  Json(Value),
  #[serde(skip_deserializing)]
  Bytes(Vec<u8>),
  #[serde(skip_deserializing)]
  Form(Vec<(String, String)>),
}

/// A deferred write as submitted by the host.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestDescriptor {
  pub url: String,
  #[serde(default)]
  pub method: Option<String>,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub body: Option<OutboundBody>,
  #[serde(default)]
  pub id: Option<String>,
}

/// A persisted, not yet delivered request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
  pub id: String,
  pub url: String,
  pub method: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Body>,
  pub enqueued_at: i64,
}

impl Persisted for QueuedRequest {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn collection() -> Collection {
    Collection::PendingRequests
  }
}

impl QueuedRequest {
  fn to_fetch(&self) -> FetchRequest {
    let mut request = FetchRequest::get(self.url.clone()).with_method(&self.method);
    request.headers = self.headers.clone();
    if !request.is_read_only() {
      request.body = self.body.clone();
    }
    request
  }
}

/// Durable request queue.
pub struct RequestQueue<S: DurableStore> {
  store: Arc<S>,
  network: Arc<dyn Network>,
  wake: Arc<dyn WakeScheduler>,
  clock: Arc<dyn Clock>,
}

impl<S: DurableStore> RequestQueue<S> {
  pub fn new(
    store: Arc<S>,
    network: Arc<dyn Network>,
    wake: Arc<dyn WakeScheduler>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      store,
      network,
      wake,
      clock,
    }
  }

  /// Normalize and persist a deferred request, returning its id.
  pub async fn enqueue(&self, descriptor: RequestDescriptor) -> Result<String> {
    if descriptor.url.trim().is_empty() {
      return Err(eyre!("Deferred request requires a URL"));
    }

    let now = self.clock.now_ms();
    let mut headers = descriptor.headers;
    let body = normalize_body(descriptor.body, &mut headers);

    let entry = QueuedRequest {
      id: descriptor
        .id
        .unwrap_or_else(|| ids::generate("req", now)),
      url: descriptor.url,
      method: descriptor
        .method
        .map(|m| m.to_ascii_uppercase())
        .unwrap_or_else(|| "POST".to_string()),
      headers,
      body,
      enqueued_at: now,
    };

    self.store.put(&entry)?;
    info!(id = %entry.id, method = %entry.method, url = %entry.url, "Queued deferred request");

    match self.wake.try_register(&WakeTag::Queue).await {
      Ok(true) => {}
      Ok(false) => warn!("Background sync unavailable, queue flushes on other triggers"),
      Err(e) => warn!(error = %e, "Failed to register background sync"),
    }

    Ok(entry.id)
  }

  /// Replay every pending request in insertion order.
  ///
  /// Failures are isolated per entry and leave the entry queued. Successful
  /// entries are removed in a single batch; their ids are returned.
  pub async fn flush(&self) -> Result<Vec<String>> {
    let pending: Vec<QueuedRequest> = self.store.get_all()?;
    if pending.is_empty() {
      debug!("Queue empty, nothing to flush");
      return Ok(Vec::new());
    }

    let mut completed = Vec::new();
    for item in &pending {
      match self.network.fetch(&item.to_fetch()).await {
        Ok(response) if response.is_success() => completed.push(item.id.clone()),
        Ok(response) => warn!(
          id = %item.id,
          url = %item.url,
          status = response.status,
          "Deferred request rejected, keeping it queued"
        ),
        Err(e) => warn!(
          id = %item.id,
          url = %item.url,
          error = %e,
          "Deferred request failed, keeping it queued"
        ),
      }
    }

    self.store.delete_many::<QueuedRequest>(&completed)?;
    info!(
      delivered = completed.len(),
      remaining = pending.len() - completed.len(),
      "Flushed request queue"
    );

    Ok(completed)
  }

  /// Requests still awaiting delivery.
  pub fn pending(&self) -> Result<Vec<QueuedRequest>> {
    self.store.get_all()
  }
}

/// Pass transport-safe bodies through; serialize structured ones to JSON text,
/// defaulting the content type when the caller set none.
fn normalize_body(
  body: Option<OutboundBody>,
  headers: &mut BTreeMap<String, String>,
) -> Option<Body> {
  match body? {
    OutboundBody::Text(text) => Some(Body::Text(text)),
    OutboundBody::Bytes(bytes) => Some(Body::Bytes(bytes)),
    OutboundBody::Form(fields) => Some(Body::Form(fields)),
    OutboundBody::Json(Value::Null) => None,
    OutboundBody::Json(value) => {
      let has_content_type = headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("content-type"));
      if !has_content_type {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
      }
      Some(Body::Text(value.to_string()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::{HttpNetwork, ManualClock};
  use crate::store::SqliteStore;
  use crate::testing::{FixedWake, ScriptedNetwork};
  use serde_json::json;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn queue_with(
    network: Arc<dyn Network>,
    wake: Arc<dyn WakeScheduler>,
  ) -> (Arc<SqliteStore>, RequestQueue<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let queue = RequestQueue::new(
      store.clone(),
      network,
      wake,
      Arc::new(ManualClock::at(1_700_000_000_000)),
    );
    (store, queue)
  }

  fn descriptor(url: &str) -> RequestDescriptor {
    RequestDescriptor {
      url: url.to_string(),
      ..RequestDescriptor::default()
    }
  }

  #[tokio::test]
  async fn test_flush_removes_only_delivered_entries() {
    let server = MockServer::start().await;
    let network = Arc::new(HttpNetwork::new(&Default::default()).unwrap());
    let (store, queue) = queue_with(network, Arc::new(FixedWake::accepting()));

    for name in ["a", "b", "c"] {
      let mut d = descriptor(&format!("{}/{}", server.uri(), name));
      d.id = Some(name.to_string());
      queue.enqueue(d).await.unwrap();
    }

    // Nothing mounted: every endpoint answers 404
    assert!(queue.flush().await.unwrap().is_empty());
    assert_eq!(store.get_all::<QueuedRequest>().unwrap().len(), 3);

    Mock::given(method("POST"))
      .and(path("/a"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;
    assert_eq!(queue.flush().await.unwrap(), vec!["a".to_string()]);
    assert_eq!(store.get_all::<QueuedRequest>().unwrap().len(), 2);

    server.reset().await;
    Mock::given(method("POST"))
      .and(path("/a"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/b"))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;
    assert_eq!(queue.flush().await.unwrap(), vec!["b".to_string()]);

    let left: Vec<String> = store
      .get_all::<QueuedRequest>()
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(left, vec!["c".to_string()]);
    server.verify().await;
  }

  #[tokio::test]
  async fn test_transport_failure_does_not_abort_flush() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond("https://api.test/ok", 204, "");
    let (_store, queue) = queue_with(network.clone(), Arc::new(FixedWake::accepting()));

    let first = queue.enqueue(descriptor("https://api.test/down")).await.unwrap();
    let second = queue.enqueue(descriptor("https://api.test/ok")).await.unwrap();

    assert_eq!(queue.flush().await.unwrap(), vec![second]);
    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first);
    assert_eq!(network.calls_to("https://api.test/down"), 1);
  }

  #[tokio::test]
  async fn test_flush_preserves_insertion_order() {
    let network = Arc::new(ScriptedNetwork::new());
    let (_store, queue) = queue_with(network.clone(), Arc::new(FixedWake::accepting()));

    for url in ["https://api.test/3", "https://api.test/1", "https://api.test/2"] {
      queue.enqueue(descriptor(url)).await.unwrap();
    }
    queue.flush().await.unwrap();

    let order: Vec<String> = network.calls().into_iter().map(|r| r.url).collect();
    assert_eq!(
      order,
      vec!["https://api.test/3", "https://api.test/1", "https://api.test/2"]
    );
  }

  #[tokio::test]
  async fn test_id_stability() {
    let network = Arc::new(ScriptedNetwork::new());
    let (store, queue) = queue_with(network, Arc::new(FixedWake::accepting()));

    let mut custom = descriptor("https://api.test/x");
    custom.id = Some("custom-1".to_string());
    assert_eq!(queue.enqueue(custom).await.unwrap(), "custom-1");
    assert!(store.get::<QueuedRequest>("custom-1").unwrap().is_some());

    let a = queue.enqueue(descriptor("https://api.test/x")).await.unwrap();
    let b = queue.enqueue(descriptor("https://api.test/x")).await.unwrap();
    assert_ne!(a, b);
    assert!(a.starts_with("req-1700000000000-"));
    assert_eq!(store.get_all::<QueuedRequest>().unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_json_body_serialized_with_default_content_type() {
    let network = Arc::new(ScriptedNetwork::new());
    let (store, queue) = queue_with(network, Arc::new(FixedWake::accepting()));

    let mut d = descriptor("https://api.test/cards");
    d.body = Some(OutboundBody::Json(json!({"card": 7, "box": 3})));
    let id = queue.enqueue(d).await.unwrap();

    let entry: QueuedRequest = store.get(&id).unwrap().unwrap();
    assert_eq!(entry.method, "POST");
    assert_eq!(
      entry.headers.get("Content-Type").map(String::as_str),
      Some("application/json")
    );
    match entry.body {
      Some(Body::Text(text)) => {
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"card": 7, "box": 3}));
      }
      other => panic!("expected text body, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_existing_content_type_kept_and_raw_bodies_pass_through() {
    let network = Arc::new(ScriptedNetwork::new());
    let (store, queue) = queue_with(network, Arc::new(FixedWake::accepting()));

    let mut json_body = descriptor("https://api.test/a");
    json_body
      .headers
      .insert("content-type".to_string(), "application/vnd.leitner+json".to_string());
    json_body.body = Some(OutboundBody::Json(json!([1, 2])));
    let id = queue.enqueue(json_body).await.unwrap();
    let entry: QueuedRequest = store.get(&id).unwrap().unwrap();
    assert_eq!(entry.headers.len(), 1);

    let mut text = descriptor("https://api.test/b");
    text.body = Some(OutboundBody::Text("front;back".to_string()));
    let id = queue.enqueue(text).await.unwrap();
    let entry: QueuedRequest = store.get(&id).unwrap().unwrap();
    assert!(entry.headers.is_empty());
    assert_eq!(entry.body, Some(Body::Text("front;back".to_string())));

    let mut bytes = descriptor("https://api.test/c");
    bytes.body = Some(OutboundBody::Bytes(vec![0, 159, 146, 150]));
    let id = queue.enqueue(bytes).await.unwrap();
    let entry: QueuedRequest = store.get(&id).unwrap().unwrap();
    assert_eq!(entry.body, Some(Body::Bytes(vec![0, 159, 146, 150])));
  }

  #[tokio::test]
  async fn test_get_entries_sent_without_body() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond("https://api.test/ping", 200, "pong");
    let (_store, queue) = queue_with(network.clone(), Arc::new(FixedWake::accepting()));

    let mut d = descriptor("https://api.test/ping");
    d.method = Some("get".to_string());
    d.body = Some(OutboundBody::Text("ignored".to_string()));
    queue.enqueue(d).await.unwrap();
    queue.flush().await.unwrap();

    let calls = network.calls();
    assert_eq!(calls[0].method, "GET");
    assert!(calls[0].body.is_none());
  }

  #[tokio::test]
  async fn test_wake_failure_is_not_fatal() {
    let wake = Arc::new(FixedWake::failing());
    let (store, queue) = queue_with(Arc::new(ScriptedNetwork::new()), wake.clone());

    queue.enqueue(descriptor("https://api.test/x")).await.unwrap();
    assert_eq!(wake.tags(), vec![WakeTag::Queue]);
    assert_eq!(store.get_all::<QueuedRequest>().unwrap().len(), 1);

    let (_store, refusing) = queue_with(
      Arc::new(ScriptedNetwork::new()),
      Arc::new(FixedWake::refusing()),
    );
    assert!(refusing.enqueue(descriptor("https://api.test/y")).await.is_ok());
  }

  #[tokio::test]
  async fn test_missing_url_rejected() {
    let (store, queue) = queue_with(
      Arc::new(ScriptedNetwork::new()),
      Arc::new(FixedWake::accepting()),
    );
    assert!(queue.enqueue(descriptor("  ")).await.is_err());
    assert!(store.get_all::<QueuedRequest>().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_empty_flush_is_noop() {
    let network = Arc::new(ScriptedNetwork::new());
    let (_store, queue) = queue_with(network.clone(), Arc::new(FixedWake::accepting()));
    assert!(queue.flush().await.unwrap().is_empty());
    assert!(network.calls().is_empty());
  }

  #[test]
  fn test_descriptor_from_host_json() {
    let d: RequestDescriptor = serde_json::from_value(json!({
      "url": "https://api.test/progress",
      "method": "PUT",
      "headers": {"X-Deck": "french"},
      "body": {"card": 1}
    }))
    .unwrap();
    assert_eq!(d.method.as_deref(), Some("PUT"));
    assert_eq!(d.body, Some(OutboundBody::Json(json!({"card": 1}))));

    let text: RequestDescriptor =
      serde_json::from_value(json!({"url": "https://x", "body": "raw"})).unwrap();
    assert_eq!(text.body, Some(OutboundBody::Text("raw".to_string())));

    let none: RequestDescriptor =
      serde_json::from_value(json!({"url": "https://x", "body": null})).unwrap();
    assert_eq!(none.body, None);
  }
}
