//! Background execution context: maps inbound signals to component calls.
//!
//! The context holds no state of its own beyond the durable store and its
//! cache version. It may be torn down between any two signals; everything
//! that must survive is persisted before `dispatch` returns.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::ArtifactCache;
use crate::config::{resolve_against, Config};
use crate::notify::{DisplayDefaults, NotificationScheduler, Reminder};
use crate::platform::{
  Clients, Clock, FetchRequest, FetchResponse, Network, NotificationOptions, NotificationSurface,
  WakeScheduler, WakeTag,
};
use crate::queue::{RequestDescriptor, RequestQueue};
use crate::store::{ArtifactStore, DurableStore, WakeLedger};

const PUSH_TITLE: &str = "Leitner Codex";
const PUSH_BODY: &str = "A new review is waiting for you.";
const PUSH_FALLBACK_TITLE: &str = "Leitner";
const PUSH_FALLBACK_BODY: &str = "New notification";

/// Messages sent by the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
  QueueSync(RequestDescriptor),
  ScheduleNotification(Reminder),
  CancelNotification { id: String },
  FlushQueue,
  DeliverNotifications { ids: Vec<String> },
  /// Unrecognized message type
  Unknown(String),
}

#[derive(Deserialize)]
struct RawMessage {
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  payload: Value,
}

#[derive(Deserialize)]
struct CancelPayload {
  id: String,
}

#[derive(Default, Deserialize)]
struct DeliverPayload {
  #[serde(default)]
  ids: Option<Vec<String>>,
}

impl HostMessage {
  /// Parse a `{"type": ..., "payload": ...}` message.
  pub fn parse(value: Value) -> Result<Self> {
    let raw: RawMessage =
      serde_json::from_value(value).map_err(|e| eyre!("Invalid host message: {}", e))?;
    let payload = match raw.payload {
      Value::Null => Value::Object(Default::default()),
      other => other,
    };

    let message = match raw.kind.as_str() {
      "queue-sync" => Self::QueueSync(
        serde_json::from_value(payload).map_err(|e| eyre!("Invalid queue-sync payload: {}", e))?,
      ),
      "schedule-notification" => Self::ScheduleNotification(
        serde_json::from_value(payload)
          .map_err(|e| eyre!("Invalid schedule-notification payload: {}", e))?,
      ),
      "cancel-notification" => {
        let p: CancelPayload = serde_json::from_value(payload)
          .map_err(|e| eyre!("Invalid cancel-notification payload: {}", e))?;
        Self::CancelNotification { id: p.id }
      }
      "flush-queue" => Self::FlushQueue,
      "deliver-notifications" => {
        let p: DeliverPayload = serde_json::from_value(payload)
          .map_err(|e| eyre!("Invalid deliver-notifications payload: {}", e))?;
        Self::DeliverNotifications {
          ids: p.ids.unwrap_or_default(),
        }
      }
      other => Self::Unknown(other.to_string()),
    };

    Ok(message)
  }
}

/// Acknowledgement sent back over a reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
  pub id: String,
}

/// Inbound platform signals.
#[derive(Debug)]
pub enum Signal {
  Install,
  Activate,
  Fetch(FetchRequest),
  ConnectivityRestored,
  Wake(String),
  /// Raw push payload, if any
  Push(Option<Vec<u8>>),
  NotificationClick(NotificationOptions),
  Message(HostMessage, Option<oneshot::Sender<Reply>>),
}

/// Result of handling a notification click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ClickRoute {
  Focused { window: String },
  Opened { url: String },
}

/// What a signal did.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
  Installed { version: String, entries: usize },
  Activated { version: String, evicted: Vec<String> },
  Response { response: FetchResponse },
  Flushed { delivered: Vec<String> },
  Delivered { delivered: Vec<String> },
  Queued { id: String },
  Scheduled { id: String },
  Cancelled { id: String },
  Pushed { displayed: bool },
  Clicked { route: ClickRoute },
  Ignored,
}

/// Host-provided capabilities.
pub struct Platform {
  pub network: Arc<dyn Network>,
  pub wake: Arc<dyn WakeScheduler>,
  pub surface: Arc<dyn NotificationSurface>,
  pub clients: Arc<dyn Clients>,
  pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  data: Option<Value>,
  tag: Option<String>,
  icon: Option<String>,
}

/// Event-driven coordinator over the cache, queue and scheduler.
pub struct BackgroundContext<S: DurableStore + ArtifactStore> {
  cache: ArtifactCache<S>,
  queue: RequestQueue<S>,
  scheduler: NotificationScheduler<S>,
  surface: Arc<dyn NotificationSurface>,
  clients: Arc<dyn Clients>,
  base_url: Url,
  /// Resolved precache URLs
  precache: Vec<String>,
}

impl<S: DurableStore + ArtifactStore + 'static> BackgroundContext<S> {
  pub fn new(config: &Config, store: Arc<S>, platform: Platform) -> Result<Self> {
    let base_url = config.base_url()?;
    let precache = config
      .cache
      .precache
      .iter()
      .map(|path| config.resolve_asset(path).map(|u| u.to_string()))
      .collect::<Result<Vec<_>>>()?;
    let offline_fallback = config.resolve_asset(&config.cache.offline_fallback)?;

    let cache = ArtifactCache::new(
      store.clone(),
      platform.network.clone(),
      config.cache.version.clone(),
      offline_fallback.to_string(),
    );
    let queue = RequestQueue::new(
      store.clone(),
      platform.network.clone(),
      platform.wake.clone(),
      platform.clock.clone(),
    );
    let scheduler = NotificationScheduler::new(
      store,
      platform.surface.clone(),
      platform.wake.clone(),
      platform.clock.clone(),
      DisplayDefaults {
        title: config.notifications.default_title.clone(),
        icon: config.notifications.default_icon.clone(),
        base_url: base_url.clone(),
      },
    )
    .with_fallback_timer(config.notifications.fallback_timer);

    Ok(Self {
      cache,
      queue,
      scheduler,
      surface: platform.surface,
      clients: platform.clients,
      base_url,
      precache,
    })
  }

  pub fn cache(&self) -> &ArtifactCache<S> {
    &self.cache
  }

  pub fn queue(&self) -> &RequestQueue<S> {
    &self.queue
  }

  pub fn scheduler(&self) -> &NotificationScheduler<S> {
    &self.scheduler
  }

  /// Handle one signal to completion.
  pub async fn dispatch(&self, signal: Signal) -> Result<Outcome> {
    match signal {
      Signal::Install => {
        let entries = self.cache.install(&self.precache).await?;
        Ok(Outcome::Installed {
          version: self.cache.version().to_string(),
          entries,
        })
      }
      Signal::Activate => {
        let evicted = self.cache.activate().await?;
        Ok(Outcome::Activated {
          version: self.cache.version().to_string(),
          evicted,
        })
      }
      Signal::Fetch(request) => {
        let response = self.cache.handle(&request).await?;
        Ok(Outcome::Response { response })
      }
      Signal::ConnectivityRestored => {
        info!("Connectivity restored, flushing queue");
        let delivered = self.queue.flush().await?;
        Ok(Outcome::Flushed { delivered })
      }
      Signal::Wake(tag) => self.wake(&tag).await,
      Signal::Push(payload) => self.push(payload.as_deref()).await,
      Signal::NotificationClick(notification) => self.click(&notification).await,
      Signal::Message(message, reply) => self.message(message, reply).await,
    }
  }

  /// Fire every wake recorded in `ledger`.
  ///
  /// A tag whose dispatch fails is recorded again, as is a notification tag
  /// whose reminder is still pending, so a later run fires it once more.
  pub async fn fire_pending_wakes(&self, ledger: &dyn WakeLedger) -> Result<Vec<Outcome>> {
    let mut outcomes = Vec::new();
    for tag in ledger.drain_wakes()? {
      let keep = match self.dispatch(Signal::Wake(tag.clone())).await {
        Ok(outcome) => {
          outcomes.push(outcome);
          match WakeTag::parse(&tag) {
            WakeTag::Notification(id) => self.scheduler.is_scheduled(&id)?,
            _ => false,
          }
        }
        Err(e) => {
          warn!(tag = %tag, error = %e, "Wake failed, keeping registration");
          true
        }
      };
      if keep {
        ledger.record_wake(&tag)?;
      }
    }
    Ok(outcomes)
  }

  async fn wake(&self, tag: &str) -> Result<Outcome> {
    match WakeTag::parse(tag) {
      WakeTag::Queue => {
        let delivered = self.queue.flush().await?;
        Ok(Outcome::Flushed { delivered })
      }
      WakeTag::Notification(id) => {
        let delivered = self.scheduler.deliver_due(&[id]).await?;
        Ok(Outcome::Delivered { delivered })
      }
      WakeTag::Other(tag) => {
        debug!(tag = %tag, "Ignoring unknown wake tag");
        Ok(Outcome::Ignored)
      }
    }
  }

  /// Display a pushed notification immediately, bypassing the scheduler.
  async fn push(&self, payload: Option<&[u8]>) -> Result<Outcome> {
    let push = parse_push(payload);
    let defaults = self.scheduler.defaults();

    let options = NotificationOptions {
      title: push.title.unwrap_or_else(|| PUSH_TITLE.to_string()),
      body: push.body.unwrap_or_else(|| PUSH_BODY.to_string()),
      data: push
        .data
        .unwrap_or_else(|| Value::Object(Default::default())),
      tag: push.tag,
      icon: defaults.icon_url(push.icon.as_deref()),
      require_interaction: false,
    };

    let displayed = match self.surface.show(&options).await {
      Ok(()) => true,
      Err(e) => {
        warn!(error = %e, "Push notification display failed");
        false
      }
    };
    Ok(Outcome::Pushed { displayed })
  }

  /// Dismiss the notification and bring the app forward.
  async fn click(&self, notification: &NotificationOptions) -> Result<Outcome> {
    if let Err(e) = self.surface.close(notification).await {
      warn!(error = %e, "Failed to close notification");
    }

    let windows = self.clients.windows().await?;
    if let Some(window) = windows.iter().find(|w| w.focusable) {
      let message = serde_json::json!({
        "type": "notification-click",
        "data": notification.data,
      });
      self.clients.post_message(window, message).await?;
      self.clients.focus(window).await?;
      return Ok(Outcome::Clicked {
        route: ClickRoute::Focused {
          window: window.id.clone(),
        },
      });
    }

    let target = notification
      .data
      .get("url")
      .and_then(Value::as_str)
      .unwrap_or("/");
    let url = resolve_against(&self.base_url, target)?.to_string();
    self.clients.open_window(&url).await?;
    Ok(Outcome::Clicked {
      route: ClickRoute::Opened { url },
    })
  }

  async fn message(
    &self,
    message: HostMessage,
    reply: Option<oneshot::Sender<Reply>>,
  ) -> Result<Outcome> {
    let outcome = match message {
      HostMessage::QueueSync(descriptor) => {
        let id = self.queue.enqueue(descriptor).await?;
        Outcome::Queued { id }
      }
      HostMessage::ScheduleNotification(reminder) => {
        let id = self.scheduler.schedule(reminder).await?;
        Outcome::Scheduled { id }
      }
      HostMessage::CancelNotification { id } => {
        self.scheduler.cancel(&id).await?;
        Outcome::Cancelled { id }
      }
      HostMessage::FlushQueue => Outcome::Flushed {
        delivered: self.queue.flush().await?,
      },
      HostMessage::DeliverNotifications { ids } => Outcome::Delivered {
        delivered: self.scheduler.deliver_due(&ids).await?,
      },
      HostMessage::Unknown(kind) => {
        debug!(kind = %kind, "Ignoring unknown host message");
        Outcome::Ignored
      }
    };

    if let (Some(tx), Outcome::Queued { id } | Outcome::Scheduled { id }) = (reply, &outcome) {
      // The host may have stopped listening
      let _ = tx.send(Reply { id: id.clone() });
    }

    Ok(outcome)
  }
}

/// Parse a push payload, degrading to plain text when it is not JSON.
///
/// Valid JSON of another shape keeps the defaults for any field that is
/// missing or not a string.
fn parse_push(payload: Option<&[u8]>) -> PushPayload {
  let Some(bytes) = payload else {
    return PushPayload::default();
  };

  match serde_json::from_slice::<Value>(bytes) {
    Ok(value) => {
      let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
      PushPayload {
        title: text("title"),
        body: text("body"),
        data: value.get("data").cloned(),
        tag: text("tag"),
        icon: text("icon"),
      }
    }
    Err(_) => {
      let text = String::from_utf8_lossy(bytes).trim().to_string();
      PushPayload {
        title: Some(PUSH_FALLBACK_TITLE.to_string()),
        body: Some(if text.is_empty() {
          PUSH_FALLBACK_BODY.to_string()
        } else {
          text
        }),
        ..PushPayload::default()
      }
    }
  }
}
