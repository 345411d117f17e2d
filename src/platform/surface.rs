//! Platform notification surface.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;

/// What gets displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
  pub title: String,
  pub body: String,
  #[serde(default)]
  pub data: Value,
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(default)]
  pub icon: Option<String>,
  #[serde(default)]
  pub require_interaction: bool,
}

#[async_trait]
pub trait NotificationSurface: Send + Sync {
  /// Display a notification. An error leaves the caller's entry pending.
  async fn show(&self, notification: &NotificationOptions) -> Result<()>;

  /// Dismiss a displayed notification.
  async fn close(&self, notification: &NotificationOptions) -> Result<()>;
}

/// Emits notifications as JSON lines on stdout for the host to render.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSurface;

impl ConsoleSurface {
  fn emit(&self, event: &str, notification: &NotificationOptions) -> Result<()> {
    let line = serde_json::json!({ "event": event, "notification": notification });
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line).map_err(|e| eyre!("Failed to write notification: {}", e))?;
    Ok(())
  }
}

#[async_trait]
impl NotificationSurface for ConsoleSurface {
  async fn show(&self, notification: &NotificationOptions) -> Result<()> {
    self.emit("show-notification", notification)
  }

  async fn close(&self, notification: &NotificationOptions) -> Result<()> {
    self.emit("close-notification", notification)
  }
}
