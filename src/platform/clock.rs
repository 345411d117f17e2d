use chrono::Utc;

/// Source of the current time, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
  now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl ManualClock {
  pub fn at(now: i64) -> Self {
    Self {
      now: std::sync::atomic::AtomicI64::new(now),
    }
  }

  pub fn set(&self, now: i64) {
    self.now.store(now, std::sync::atomic::Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_ms(&self) -> i64 {
    self.now.load(std::sync::atomic::Ordering::SeqCst)
  }
}
