use color_eyre::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::resolve_against;
use crate::ids;
use crate::platform::{Clock, NotificationOptions, NotificationSurface, WakeScheduler, WakeTag};
use crate::store::{Collection, DurableStore, Persisted};

/// A reminder request from the host.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub body: String,
  /// Delay from now; negative values count as zero
  #[serde(default)]
  pub delay_ms: Option<i64>,
  /// Absolute due time, takes precedence over `delay_ms`
  #[serde(default)]
  pub scheduled_at: Option<i64>,
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default)]
  pub require_interaction: Option<bool>,
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(default)]
  pub icon: Option<String>,
}

/// A persisted reminder awaiting display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotification {
  pub id: String,
  pub title: String,
  pub body: String,
  pub data: Value,
  /// Due time, ms since the Unix epoch
  pub scheduled_at: i64,
  pub created_at: i64,
  pub tag: Option<String>,
  pub icon: Option<String>,
  pub require_interaction: bool,
}

impl Persisted for ScheduledNotification {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn collection() -> Collection {
    Collection::ScheduledNotifications
  }
}

impl ScheduledNotification {
  pub fn is_due(&self, now: i64) -> bool {
    self.scheduled_at <= now
  }
}

/// Presentation defaults applied at display time.
#[derive(Debug, Clone)]
pub struct DisplayDefaults {
  pub title: String,
  pub icon: String,
  pub base_url: Url,
}

impl DisplayDefaults {
  /// Absolute icon URL, falling back to the default icon.
  pub fn icon_url(&self, icon: Option<&str>) -> Option<String> {
    let path = icon.unwrap_or(&self.icon);
    match resolve_against(&self.base_url, path) {
      Ok(url) => Some(url.to_string()),
      Err(e) => {
        warn!(icon = %path, error = %e, "Ignoring unresolvable icon");
        None
      }
    }
  }
}

/// Reminder scheduler over the durable store.
pub struct NotificationScheduler<S: DurableStore> {
  store: Arc<S>,
  surface: Arc<dyn NotificationSurface>,
  wake: Arc<dyn WakeScheduler>,
  clock: Arc<dyn Clock>,
  defaults: Arc<DisplayDefaults>,
  /// Arm an in-process timer on schedule
  fallback_timer: bool,
}

impl<S: DurableStore + 'static> NotificationScheduler<S> {
  pub fn new(
    store: Arc<S>,
    surface: Arc<dyn NotificationSurface>,
    wake: Arc<dyn WakeScheduler>,
    clock: Arc<dyn Clock>,
    defaults: DisplayDefaults,
  ) -> Self {
    Self {
      store,
      surface,
      wake,
      clock,
      defaults: Arc::new(defaults),
      fallback_timer: true,
    }
  }

  /// Enable or disable the in-process fallback timer.
  pub fn with_fallback_timer(mut self, enabled: bool) -> Self {
    self.fallback_timer = enabled;
    self
  }

  pub fn defaults(&self) -> &DisplayDefaults {
    &self.defaults
  }

  /// Persist a reminder and register for its wake. Returns the reminder id.
  pub async fn schedule(&self, reminder: Reminder) -> Result<String> {
    let now = self.clock.now_ms();
    let scheduled_at = reminder
      .scheduled_at
      .unwrap_or_else(|| now.saturating_add(reminder.delay_ms.unwrap_or(0).max(0)));

    let entry = ScheduledNotification {
      id: reminder
        .id
        .unwrap_or_else(|| ids::generate("notif", now)),
      title: reminder.title,
      body: reminder.body,
      data: reminder.data.unwrap_or(Value::Null),
      scheduled_at,
      created_at: now,
      tag: reminder.tag,
      icon: reminder.icon,
      require_interaction: reminder.require_interaction.unwrap_or(false),
    };

    self.store.put(&entry)?;
    info!(id = %entry.id, scheduled_at = entry.scheduled_at, "Scheduled notification");

    let tag = WakeTag::Notification(entry.id.clone());
    match self.wake.try_register(&tag).await {
      Ok(true) => {}
      Ok(false) => warn!(id = %entry.id, "Notification wake not registered"),
      Err(e) => warn!(id = %entry.id, error = %e, "Failed to register notification sync"),
    }

    if self.fallback_timer {
      self.arm_timer(entry.id.clone(), scheduled_at.saturating_sub(now).max(0));
    }

    Ok(entry.id)
  }

  /// Delete a reminder. Unknown ids are a no-op.
  pub async fn cancel(&self, id: &str) -> Result<()> {
    self.store.delete::<ScheduledNotification>(id)?;
    debug!(id = %id, "Cancelled notification");
    Ok(())
  }

  /// Display every due reminder (restricted to `ids` when non-empty).
  ///
  /// Each entry is deleted right after its own successful display; entries
  /// whose display fails stay persisted. Returns the delivered ids.
  pub async fn deliver_due(&self, ids: &[String]) -> Result<Vec<String>> {
    let now = self.clock.now_ms();
    let due: Vec<ScheduledNotification> = self
      .store
      .get_all::<ScheduledNotification>()?
      .into_iter()
      .filter(|n| n.is_due(now) && (ids.is_empty() || ids.contains(&n.id)))
      .collect();

    if due.is_empty() {
      return Ok(Vec::new());
    }

    let results = join_all(due.iter().map(|n| self.deliver_one(n))).await;

    let mut delivered = Vec::new();
    for result in results {
      if let Some(id) = result? {
        delivered.push(id);
      }
    }

    info!(due = due.len(), delivered = delivered.len(), "Delivered notifications");
    Ok(delivered)
  }

  /// Whether a reminder is still awaiting delivery.
  pub fn is_scheduled(&self, id: &str) -> Result<bool> {
    Ok(self.store.get::<ScheduledNotification>(id)?.is_some())
  }

  /// Reminders not yet delivered or cancelled.
  pub fn scheduled(&self) -> Result<Vec<ScheduledNotification>> {
    self.store.get_all()
  }

  async fn deliver_one(&self, notification: &ScheduledNotification) -> Result<Option<String>> {
    let options = self.display_options(notification);
    if let Err(e) = self.surface.show(&options).await {
      warn!(id = %notification.id, error = %e, "Notification display failed");
      return Ok(None);
    }

    self
      .store
      .delete::<ScheduledNotification>(&notification.id)?;
    Ok(Some(notification.id.clone()))
  }

  fn display_options(&self, notification: &ScheduledNotification) -> NotificationOptions {
    let title = if notification.title.is_empty() {
      self.defaults.title.clone()
    } else {
      notification.title.clone()
    };

    NotificationOptions {
      title,
      body: notification.body.clone(),
      data: notification.data.clone(),
      tag: Some(
        notification
          .tag
          .clone()
          .unwrap_or_else(|| notification.id.clone()),
      ),
      icon: self.defaults.icon_url(notification.icon.as_deref()),
      require_interaction: notification.require_interaction,
    }
  }

  /// Deliver after `delay_ms` if this process is still alive by then.
  fn arm_timer(&self, id: String, delay_ms: i64) {
    let scheduler = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
      if let Err(e) = scheduler.deliver_due(&[id]).await {
        warn!(error = %e, "Notification delivery failed");
      }
    });
  }
}

impl<S: DurableStore> Clone for NotificationScheduler<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      surface: Arc::clone(&self.surface),
      wake: Arc::clone(&self.wake),
      clock: Arc::clone(&self.clock),
      defaults: Arc::clone(&self.defaults),
      fallback_timer: self.fallback_timer,
    }
  }
}
