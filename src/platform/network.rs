//! Network access and the request/response types passed through the engine.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::HttpConfig;

/// A transport-safe request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Body {
  Text(String),
  Bytes(Vec<u8>),
  /// Form fields, sent url-encoded
  Form(Vec<(String, String)>),
}

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub method: String,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Body>,
  /// Top-level document load, as opposed to a subresource
  pub navigate: bool,
}

impl FetchRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.into(),
      headers: BTreeMap::new(),
      body: None,
      navigate: false,
    }
  }

  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      navigate: true,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_body(mut self, body: Body) -> Self {
    self.body = Some(body);
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Methods that never carry a body.
  pub fn is_read_only(&self) -> bool {
    self.is_get() || self.method.eq_ignore_ascii_case("HEAD")
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Network unavailable, served from the artifact cache
  Cache,
  /// Network unavailable and nothing cached, served the offline document
  OfflineFallback,
}

/// A received (or cached) response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  #[serde(skip)]
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl FetchResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Network transport. An `Err` is a transport failure; any HTTP status is `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &HttpConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
      let value =
        HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value: {}", e))?;
      headers.insert(name, value);
    }

    let mut builder = self.client.request(method, &request.url).headers(headers);
    if !request.is_read_only() {
      builder = match &request.body {
        Some(Body::Text(text)) => builder.body(text.clone()),
        Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
        Some(Body::Form(fields)) => builder.form(fields),
        None => builder,
      };
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", request.url, e))?
      .to_vec();

    Ok(FetchResponse {
      status,
      headers,
      body,
      source: ResponseSource::Network,
    })
  }
}
