//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::key::request_key;
use crate::platform::{FetchRequest, FetchResponse, Network, ResponseSource};
use crate::store::{ArtifactStore, CachedArtifact};

/// Versioned artifact cache.
///
/// This layer sits between the host application and the network,
/// providing transparent caching with offline support. Exactly one
/// version is current for a given instance.
pub struct ArtifactCache<S: ArtifactStore> {
  store: Arc<S>,
  network: Arc<dyn Network>,
  /// Version tag entries are written under
  version: String,
  /// Absolute URL of the document served to offline navigations
  offline_fallback: String,
}

impl<S: ArtifactStore> ArtifactCache<S> {
  pub fn new(
    store: Arc<S>,
    network: Arc<dyn Network>,
    version: impl Into<String>,
    offline_fallback: impl Into<String>,
  ) -> Self {
    Self {
      store,
      network,
      version: version.into(),
      offline_fallback: offline_fallback.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Fetch every asset and store them all under the current version.
  ///
  /// Any transport failure or non-2xx status fails the whole install and
  /// nothing is written.
  pub async fn install(&self, assets: &[String]) -> Result<usize> {
    let fetches = assets.iter().map(|url| async move {
      let request = FetchRequest::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| e.wrap_err(format!("Failed to precache {}", url)))?;
      if !response.is_success() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>(to_artifact(&request, &response))
    });

    let artifacts = try_join_all(fetches).await?;
    self.store.create_version(&self.version, &artifacts)?;

    info!(
      version = %self.version,
      entries = artifacts.len(),
      "Installed artifact cache"
    );
    Ok(artifacts.len())
  }

  /// Delete every stored version except the current one.
  ///
  /// Fails, evicting nothing, until the current version has been installed.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let versions = self.store.versions()?;
    if !versions.iter().any(|v| *v == self.version) {
      return Err(eyre!(
        "Cannot activate cache {}: it has not been installed",
        self.version
      ));
    }

    let mut evicted = Vec::new();
    for version in versions {
      if version == self.version {
        continue;
      }
      if self.store.delete_version(&version)? {
        evicted.push(version);
      }
    }

    info!(version = %self.version, evicted = ?evicted, "Activated artifact cache");
    Ok(evicted)
  }

  /// Network-first handling of a request.
  ///
  /// 1. Non-GET requests go straight to the network, cache untouched
  /// 2. GET: try the network; a 2xx response is written through to the cache
  /// 3. On transport failure, serve the cached entry for the request
  /// 4. Nothing cached: navigations get the offline document, anything else fails
  pub async fn handle(&self, request: &FetchRequest) -> Result<FetchResponse> {
    if !request.is_get() {
      return self.network.fetch(request).await;
    }

    let key = request_key(&request.url);
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.write_through(request, &response);
        }
        Ok(response)
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "Network failed, trying cache");

        if let Some(cached) = self.lookup(&key)? {
          return Ok(to_response(cached, ResponseSource::Cache));
        }

        if request.navigate {
          if let Some(fallback) = self.lookup(&request_key(&self.offline_fallback))? {
            return Ok(to_response(fallback, ResponseSource::OfflineFallback));
          }
        }

        Err(err.wrap_err(format!("{} is unavailable offline", request.url)))
      }
    }
  }

  /// Versions currently stored, with their entry counts.
  pub fn status(&self) -> Result<Vec<(String, usize)>> {
    self
      .store
      .versions()?
      .into_iter()
      .map(|version| {
        let count = self.store.entry_count(&version)?;
        Ok((version, count))
      })
      .collect()
  }

  /// Store a fresh response. A version evicted meanwhile silently drops the write.
  fn write_through(&self, request: &FetchRequest, response: &FetchResponse) {
    let artifact = to_artifact(request, response);
    match self.store.put_artifact(&self.version, &artifact) {
      Ok(true) => debug!(url = %request.url, "Cached response"),
      Ok(false) => debug!(
        url = %request.url,
        version = %self.version,
        "Cache version gone, dropping write"
      ),
      Err(e) => warn!(url = %request.url, error = %e, "Failed to cache response"),
    }
  }

  /// Current version first, then any other stored version.
  fn lookup(&self, key: &str) -> Result<Option<CachedArtifact>> {
    if let Some(hit) = self.store.match_artifact(&self.version, key)? {
      return Ok(Some(hit));
    }
    for version in self.store.versions()? {
      if version == self.version {
        continue;
      }
      if let Some(hit) = self.store.match_artifact(&version, key)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }
}

fn to_artifact(request: &FetchRequest, response: &FetchResponse) -> CachedArtifact {
  CachedArtifact {
    request_key: request_key(&request.url),
    url: request.url.clone(),
    status: response.status,
    headers: response.headers.clone(),
    body: response.body.clone(),
    cached_at: Utc::now(),
  }
}

fn to_response(artifact: CachedArtifact, source: ResponseSource) -> FetchResponse {
  FetchResponse {
    status: artifact.status,
    headers: artifact.headers,
    body: artifact.body,
    source,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::Body;
  use crate::store::SqliteStore;
  use crate::testing::ScriptedNetwork;

  const INDEX: &str = "https://app.test/index.html";
  const STYLE: &str = "https://app.test/style.css";
  const DECK: &str = "https://app.test/decks/french.csv";

  fn setup(version: &str) -> (Arc<SqliteStore>, Arc<ScriptedNetwork>, ArtifactCache<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(ScriptedNetwork::new());
    let cache = ArtifactCache::new(store.clone(), network.clone(), version, INDEX);
    (store, network, cache)
  }

  fn assets() -> Vec<String> {
    vec![INDEX.to_string(), STYLE.to_string()]
  }

  #[tokio::test]
  async fn test_install_stores_every_asset() {
    let (store, network, cache) = setup("v1");
    network.respond(INDEX, 200, "<html>");
    network.respond(STYLE, 200, "body{}");

    assert_eq!(cache.install(&assets()).await.unwrap(), 2);
    assert_eq!(store.entry_count("v1").unwrap(), 2);
  }

  #[tokio::test]
  async fn test_install_is_atomic() {
    let (store, network, cache) = setup("v1");
    network.respond(INDEX, 200, "<html>");
    network.respond(STYLE, 404, "missing");

    assert!(cache.install(&assets()).await.is_err());
    assert!(store.versions().unwrap().is_empty());

    network.go_offline(STYLE);
    assert!(cache.install(&assets()).await.is_err());
    assert!(store.versions().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_activate_evicts_previous_version() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(INDEX, 200, "v1 page");
    network.respond(STYLE, 200, "v1 style");

    let v1 = ArtifactCache::new(store.clone(), network.clone(), "v1", INDEX);
    v1.install(&assets()).await.unwrap();
    v1.activate().await.unwrap();

    network.respond(INDEX, 200, "v2 page");
    let v2 = ArtifactCache::new(store.clone(), network.clone(), "v2", INDEX);
    v2.install(&[INDEX.to_string()]).await.unwrap();
    assert_eq!(v2.activate().await.unwrap(), vec!["v1".to_string()]);

    let key = request_key(STYLE);
    assert!(store.match_artifact("v1", &key).unwrap().is_none());
    assert!(store
      .match_artifact("v2", &request_key(INDEX))
      .unwrap()
      .is_some());

    // Only v2 content is served offline now
    network.go_offline_entirely();
    let page = v2.handle(&FetchRequest::navigate(INDEX)).await.unwrap();
    assert_eq!(page.body, b"v2 page".to_vec());
    assert!(v2.handle(&FetchRequest::get(STYLE)).await.is_err());
  }

  #[tokio::test]
  async fn test_activate_without_install_keeps_previous_version() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(INDEX, 200, "v1 page");

    let v1 = ArtifactCache::new(store.clone(), network.clone(), "v1", INDEX);
    v1.install(&[INDEX.to_string()]).await.unwrap();
    v1.activate().await.unwrap();

    network.go_offline_entirely();
    let v2 = ArtifactCache::new(store.clone(), network.clone(), "v2", INDEX);
    assert!(v2.install(&[INDEX.to_string()]).await.is_err());
    assert!(v2.activate().await.is_err());
    assert_eq!(store.versions().unwrap(), vec!["v1".to_string()]);

    // The old shell still answers offline navigations
    let page = v2
      .handle(&FetchRequest::navigate("https://app.test/review"))
      .await
      .unwrap();
    assert_eq!(page.source, ResponseSource::OfflineFallback);
    assert_eq!(page.body, b"v1 page".to_vec());
  }

  #[tokio::test]
  async fn test_get_writes_through_and_serves_offline() {
    let (store, network, cache) = setup("v1");
    store.create_version("v1", &[]).unwrap();
    network.respond(DECK, 200, "front,back");

    let fresh = cache.handle(&FetchRequest::get(DECK)).await.unwrap();
    assert_eq!(fresh.source, ResponseSource::Network);

    network.go_offline(DECK);
    let cached = cache.handle(&FetchRequest::get(DECK)).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.body, b"front,back".to_vec());
  }

  #[tokio::test]
  async fn test_error_status_not_cached() {
    let (store, network, cache) = setup("v1");
    store.create_version("v1", &[]).unwrap();
    network.respond(DECK, 500, "boom");

    let response = cache.handle(&FetchRequest::get(DECK)).await.unwrap();
    assert_eq!(response.status, 500);
    assert_eq!(store.entry_count("v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_navigation_falls_back_to_offline_document() {
    let (_store, network, cache) = setup("v1");
    network.respond(INDEX, 200, "<html>offline shell");
    cache.install(&[INDEX.to_string()]).await.unwrap();
    network.go_offline_entirely();

    let response = cache
      .handle(&FetchRequest::navigate("https://app.test/stats"))
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::OfflineFallback);
    assert_eq!(response.body, b"<html>offline shell".to_vec());
  }

  #[tokio::test]
  async fn test_subresource_miss_propagates_failure() {
    let (_store, network, cache) = setup("v1");
    network.respond(INDEX, 200, "<html>");
    cache.install(&[INDEX.to_string()]).await.unwrap();
    network.go_offline_entirely();

    assert!(cache
      .handle(&FetchRequest::get("https://app.test/missing.js"))
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_non_get_bypasses_cache() {
    let (store, network, cache) = setup("v1");
    store.create_version("v1", &[]).unwrap();
    let url = "https://app.test/api/progress";

    network.respond(url, 200, "ok");
    let post = FetchRequest::get(url)
      .with_method("POST")
      .with_body(Body::Text("{}".to_string()));
    cache.handle(&post).await.unwrap();
    assert_eq!(store.entry_count("v1").unwrap(), 0);

    // A cached GET for the same URL must not answer an offline POST
    cache.handle(&FetchRequest::get(url)).await.unwrap();
    assert_eq!(store.entry_count("v1").unwrap(), 1);
    network.go_offline(url);
    assert!(cache.handle(&post).await.is_err());
    assert_eq!(store.entry_count("v1").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_write_through_after_eviction_is_dropped() {
    let (store, network, cache) = setup("v1");
    network.respond(DECK, 200, "data");

    // Version never created (or already evicted): the response is still returned
    let response = cache.handle(&FetchRequest::get(DECK)).await.unwrap();
    assert!(response.is_success());
    assert!(store.versions().unwrap().is_empty());
    assert_eq!(store.entry_count("v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_status_lists_versions() {
    let (_store, network, cache) = setup("v1");
    network.respond(INDEX, 200, "<html>");
    cache.install(&[INDEX.to_string()]).await.unwrap();

    assert_eq!(cache.status().unwrap(), vec![("v1".to_string(), 1)]);
  }
}
