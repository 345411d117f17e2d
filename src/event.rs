use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::platform::{Body, FetchRequest, NotificationOptions};
use crate::worker::{HostMessage, Signal};

/// Serve-mode events
#[derive(Debug)]
pub enum Event {
  /// A signal line read from stdin
  Line(String),
  /// Periodic tick for due-time polling
  Tick,
  /// Input closed; no more lines will arrive
  Eof,
}

/// One JSON signal per input line.
#[derive(Debug, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
enum SignalLine {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    navigate: bool,
    #[serde(default)]
    body: Option<String>,
  },
  Online,
  Wake {
    tag: String,
  },
  Push {
    #[serde(default)]
    payload: Option<String>,
  },
  Click {
    notification: NotificationOptions,
  },
  Message {
    message: Value,
  },
}

/// Parse a signal line. Message signals come back with their host message
/// so the caller can attach a reply channel.
pub fn parse_signal(line: &str) -> Result<Signal> {
  let parsed: SignalLine =
    serde_json::from_str(line).map_err(|e| eyre!("Invalid signal line: {}", e))?;

  let signal = match parsed {
    SignalLine::Install => Signal::Install,
    SignalLine::Activate => Signal::Activate,
    SignalLine::Fetch {
      url,
      method,
      navigate,
      body,
    } => {
      let mut request = if navigate {
        FetchRequest::navigate(url)
      } else {
        FetchRequest::get(url)
      };
      if let Some(method) = method {
        request = request.with_method(&method);
      }
      if let Some(body) = body {
        request = request.with_body(Body::Text(body));
      }
      Signal::Fetch(request)
    }
    SignalLine::Online => Signal::ConnectivityRestored,
    SignalLine::Wake { tag } => Signal::Wake(tag),
    SignalLine::Push { payload } => Signal::Push(payload.map(String::into_bytes)),
    SignalLine::Click { notification } => Signal::NotificationClick(notification),
    SignalLine::Message { message } => Signal::Message(HostMessage::parse(message)?, None),
  };

  Ok(signal)
}

/// Event handler that produces events from stdin lines and a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler over stdin with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    Self::from_reader(tokio::io::stdin(), tick_rate)
  }

  /// Create an event handler reading signal lines from `reader`
  pub fn from_reader<R>(reader: R, tick_rate: Duration) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let (done_tx, mut done_rx) = oneshot::channel::<()>();

    // Spawn line reader; reports Eof and stops the ticker at end of input
    let line_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) if line.trim().is_empty() => continue,
          Ok(Some(line)) => {
            if line_tx.send(Event::Line(line)).is_err() {
              break;
            }
          }
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "Failed to read signal input");
            break;
          }
        }
      }
      let _ = done_tx.send(());
      let _ = line_tx.send(Event::Eof);
    });

    // Spawn ticker
    let tick_tx = tx;
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        tokio::select! {
          _ = &mut done_rx => break,
          _ = interval.tick() => {
            if tick_tx.send(Event::Tick).is_err() {
              break;
            }
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event. `None` once every producer has stopped.
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
