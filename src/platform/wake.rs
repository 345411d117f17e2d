//! Deferred wake registration.

use async_trait::async_trait;
use color_eyre::Result;
use std::fmt;
use std::sync::Arc;

use crate::store::WakeLedger;

const QUEUE_TAG: &str = "leitner-sync:pending";
const NOTIFICATION_PREFIX: &str = "leitner-notification:";

/// Tag identifying why the context should be woken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeTag {
  /// Flush the request queue
  Queue,
  /// Deliver one scheduled notification
  Notification(String),
  /// Not ours
  Other(String),
}

impl WakeTag {
  pub fn parse(tag: &str) -> Self {
    if tag == QUEUE_TAG {
      return Self::Queue;
    }
    match tag.strip_prefix(NOTIFICATION_PREFIX) {
      Some(id) => Self::Notification(id.to_string()),
      None => Self::Other(tag.to_string()),
    }
  }
}

impl fmt::Display for WakeTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Queue => f.write_str(QUEUE_TAG),
      Self::Notification(id) => write!(f, "{}{}", NOTIFICATION_PREFIX, id),
      Self::Other(tag) => f.write_str(tag),
    }
  }
}

/// Best-effort request to be re-invoked later.
///
/// `Ok(false)` and `Err` both mean "not registered"; callers rely on other
/// triggers in that case and never treat it as fatal.
#[async_trait]
pub trait WakeScheduler: Send + Sync {
  async fn try_register(&self, tag: &WakeTag) -> Result<bool>;
}

/// Records registrations in the durable store so a later process can fire them.
pub struct LedgerWakeScheduler<L: WakeLedger> {
  ledger: Arc<L>,
}

impl<L: WakeLedger> LedgerWakeScheduler<L> {
  pub fn new(ledger: Arc<L>) -> Self {
    Self { ledger }
  }
}

#[async_trait]
impl<L: WakeLedger + 'static> WakeScheduler for LedgerWakeScheduler<L> {
  async fn try_register(&self, tag: &WakeTag) -> Result<bool> {
    self.ledger.record_wake(&tag.to_string())?;
    Ok(true)
  }
}
