//! Fakes for the platform traits, shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::platform::{
  ClientWindow, Clients, FetchRequest, FetchResponse, Network, NotificationOptions,
  NotificationSurface, ResponseSource, WakeScheduler, WakeTag,
};

/// Network whose answers are set per URL. Unknown URLs fail like a dropped connection.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
  calls: Mutex<Vec<FetchRequest>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, body.as_bytes().to_vec()));
  }

  pub fn go_offline(&self, url: &str) {
    self.routes.lock().unwrap().remove(url);
  }

  pub fn go_offline_entirely(&self) {
    self.routes.lock().unwrap().clear();
  }

  pub fn calls(&self) -> Vec<FetchRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self.calls().iter().filter(|r| r.url == url).count()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    self.calls.lock().unwrap().push(request.clone());
    let route = self.routes.lock().unwrap().get(&request.url).cloned();
    match route {
      Some((status, body)) => Ok(FetchResponse {
        status,
        headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
        body,
        source: ResponseSource::Network,
      }),
      None => Err(eyre!("connection refused: {}", request.url)),
    }
  }
}

/// Surface that records what was shown; titles listed in `reject` fail.
#[derive(Default)]
pub struct RecordingSurface {
  shown: Mutex<Vec<NotificationOptions>>,
  closed: Mutex<Vec<NotificationOptions>>,
  reject: Mutex<HashSet<String>>,
}

impl RecordingSurface {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn reject_title(&self, title: &str) {
    self.reject.lock().unwrap().insert(title.to_string());
  }

  pub fn accept_all(&self) {
    self.reject.lock().unwrap().clear();
  }

  pub fn shown(&self) -> Vec<NotificationOptions> {
    self.shown.lock().unwrap().clone()
  }

  pub fn closed(&self) -> Vec<NotificationOptions> {
    self.closed.lock().unwrap().clone()
  }
}

#[async_trait]
impl NotificationSurface for RecordingSurface {
  async fn show(&self, notification: &NotificationOptions) -> Result<()> {
    if self.reject.lock().unwrap().contains(&notification.title) {
      return Err(eyre!("display refused"));
    }
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  async fn close(&self, notification: &NotificationOptions) -> Result<()> {
    self.closed.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

/// Wake scheduler answering a fixed way and remembering what was asked.
pub struct FixedWake {
  outcome: Option<bool>,
  tags: Mutex<Vec<WakeTag>>,
}

impl FixedWake {
  pub fn accepting() -> Self {
    Self {
      outcome: Some(true),
      tags: Mutex::new(Vec::new()),
    }
  }

  pub fn refusing() -> Self {
    Self {
      outcome: Some(false),
      tags: Mutex::new(Vec::new()),
    }
  }

  pub fn failing() -> Self {
    Self {
      outcome: None,
      tags: Mutex::new(Vec::new()),
    }
  }

  pub fn tags(&self) -> Vec<WakeTag> {
    self.tags.lock().unwrap().clone()
  }
}

#[async_trait]
impl WakeScheduler for FixedWake {
  async fn try_register(&self, tag: &WakeTag) -> Result<bool> {
    self.tags.lock().unwrap().push(tag.clone());
    self.outcome.ok_or_else(|| eyre!("background sync unavailable"))
  }
}

/// Host windows that record every interaction.
#[derive(Default)]
pub struct RecordingClients {
  windows: Vec<ClientWindow>,
  pub actions: Mutex<Vec<String>>,
  pub messages: Mutex<Vec<Value>>,
}

impl RecordingClients {
  pub fn none() -> Self {
    Self::default()
  }

  pub fn with_window(url: &str) -> Self {
    Self {
      windows: vec![ClientWindow {
        id: "w1".to_string(),
        url: url.to_string(),
        focusable: true,
      }],
      ..Self::default()
    }
  }

  pub fn actions(&self) -> Vec<String> {
    self.actions.lock().unwrap().clone()
  }
}

#[async_trait]
impl Clients for RecordingClients {
  async fn windows(&self) -> Result<Vec<ClientWindow>> {
    Ok(self.windows.clone())
  }

  async fn post_message(&self, window: &ClientWindow, message: Value) -> Result<()> {
    self.messages.lock().unwrap().push(message);
    self
      .actions
      .lock()
      .unwrap()
      .push(format!("post:{}", window.id));
    Ok(())
  }

  async fn focus(&self, window: &ClientWindow) -> Result<()> {
    self
      .actions
      .lock()
      .unwrap()
      .push(format!("focus:{}", window.id));
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self.actions.lock().unwrap().push(format!("open:{}", url));
    Ok(())
  }
}
