//! Open host surfaces (application windows).

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::io::Write;

/// An open window of the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: String,
  pub url: String,
  /// Whether the window can be brought to the foreground
  pub focusable: bool,
}

#[async_trait]
pub trait Clients: Send + Sync {
  /// Open windows, including ones not yet controlled by this context.
  async fn windows(&self) -> Result<Vec<ClientWindow>>;

  async fn post_message(&self, window: &ClientWindow, message: Value) -> Result<()>;

  async fn focus(&self, window: &ClientWindow) -> Result<()>;

  async fn open_window(&self, url: &str) -> Result<()>;
}

/// Windows announced on the command line; actions are emitted as JSON lines.
#[derive(Debug, Clone, Default)]
pub struct ConsoleClients {
  windows: Vec<ClientWindow>,
}

impl ConsoleClients {
  pub fn new(urls: &[String]) -> Self {
    let windows = urls
      .iter()
      .enumerate()
      .map(|(i, url)| ClientWindow {
        id: format!("window-{}", i),
        url: url.clone(),
        focusable: true,
      })
      .collect();
    Self { windows }
  }

  fn emit(&self, line: Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line).map_err(|e| eyre!("Failed to write client event: {}", e))?;
    Ok(())
  }
}

#[async_trait]
impl Clients for ConsoleClients {
  async fn windows(&self) -> Result<Vec<ClientWindow>> {
    Ok(self.windows.clone())
  }

  async fn post_message(&self, window: &ClientWindow, message: Value) -> Result<()> {
    self.emit(serde_json::json!({
      "event": "post-message",
      "window": window.id,
      "message": message,
    }))
  }

  async fn focus(&self, window: &ClientWindow) -> Result<()> {
    self.emit(serde_json::json!({ "event": "focus", "window": window.id, "url": window.url }))
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self.emit(serde_json::json!({ "event": "open-window", "url": url }))
  }
}
