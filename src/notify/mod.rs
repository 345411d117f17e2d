//! Time-based reminder notifications that survive restarts.
//!
//! Reminders are persisted with an absolute due time. Two delivery paths
//! exist: the durable one (wake registration plus due-time checks on every
//! delivery trigger) and a best-effort in-process timer that is lost when
//! the process exits. The durable path alone is sufficient.

mod scheduler;

pub use scheduler::{DisplayDefaults, NotificationScheduler, Reminder, ScheduledNotification};
