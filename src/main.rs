mod cache;
mod config;
mod db;
mod event;
mod ids;
mod logging;
mod notify;
mod platform;
mod queue;
mod store;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use event::{Event, EventHandler};
use platform::{
  Body, ConsoleClients, ConsoleSurface, FetchRequest, HttpNetwork, LedgerWakeScheduler,
  NotificationOptions, SystemClock,
};
use store::SqliteStore;
use worker::{BackgroundContext, HostMessage, Outcome, Platform, Signal};

#[derive(Parser, Debug)]
#[command(name = "leitner-offline")]
#[command(about = "Offline cache, deferred request queue and reminder scheduler for Leitner")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/leitner-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Database file, overriding the config
  #[arg(long)]
  database: Option<PathBuf>,

  /// URL of an open application window (repeatable)
  #[arg(long = "client")]
  clients: Vec<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the configured assets under the current cache version
  Install,
  /// Evict every cache version except the current one
  Activate,
  /// Fetch a resource through the artifact cache
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat as a top-level navigation
    #[arg(long)]
    navigate: bool,
    /// Request body (non-GET only)
    #[arg(short, long)]
    data: Option<String>,
    /// Write the response body to stdout after the summary
    #[arg(long)]
    body: bool,
  },
  /// Connectivity came back: flush the request queue
  Online,
  /// Fire a deferred wake
  Wake {
    /// Wake tag, e.g. leitner-sync:pending or leitner-notification:<id>
    #[arg(required_unless_present = "pending")]
    tag: Option<String>,
    /// Fire every recorded wake registration
    #[arg(long, conflicts_with = "tag")]
    pending: bool,
  },
  /// Deliver a push payload
  Push { payload: Option<String> },
  /// A displayed notification was clicked (notification as JSON)
  Click { notification: String },
  /// Send a host message, e.g. '{"type": "flush-queue"}'
  Send { message: String },
  /// Inspect the request queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Inspect scheduled notifications
  #[command(subcommand)]
  Notifications(NotificationsCommand),
  /// Inspect the artifact cache
  #[command(subcommand)]
  Cache(CacheCommand),
  /// Read JSON signals from stdin, one per line
  Serve {
    /// Seconds between due-notification checks
    #[arg(long, default_value_t = 30)]
    poll_secs: u64,
  },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List pending requests
  List,
}

#[derive(Subcommand, Debug)]
enum NotificationsCommand {
  /// List scheduled notifications
  List,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Show stored versions and entry counts
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(path) = args.database {
    config.store.path = Some(path);
  }

  let _log_guard = logging::init(&config.log)?;

  let store = Arc::new(SqliteStore::open(&config.database_path()?)?);
  let platform = Platform {
    network: Arc::new(HttpNetwork::new(&config.http)?),
    wake: Arc::new(LedgerWakeScheduler::new(store.clone())),
    surface: Arc::new(ConsoleSurface),
    clients: Arc::new(ConsoleClients::new(&args.clients)),
    clock: Arc::new(SystemClock),
  };
  let context = BackgroundContext::new(&config, store.clone(), platform)?;

  match args.command {
    Command::Install => print_outcome(&context.dispatch(Signal::Install).await?),
    Command::Activate => print_outcome(&context.dispatch(Signal::Activate).await?),
    Command::Fetch {
      url,
      method,
      navigate,
      data,
      body,
    } => {
      let mut request = if navigate {
        FetchRequest::navigate(url)
      } else {
        FetchRequest::get(url)
      }
      .with_method(&method);
      if let Some(data) = data {
        request = request.with_body(Body::Text(data));
      }

      let outcome = context.dispatch(Signal::Fetch(request)).await?;
      print_outcome(&outcome)?;
      if let (true, Outcome::Response { response }) = (body, &outcome) {
        std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?;
      }
      Ok(())
    }
    Command::Online => print_outcome(&context.dispatch(Signal::ConnectivityRestored).await?),
    Command::Wake { tag, pending } => {
      if pending {
        for outcome in context.fire_pending_wakes(&*store).await? {
          print_outcome(&outcome)?;
        }
      } else if let Some(tag) = tag {
        print_outcome(&context.dispatch(Signal::Wake(tag)).await?)?;
      }
      Ok(())
    }
    Command::Push { payload } => {
      let signal = Signal::Push(payload.map(String::into_bytes));
      print_outcome(&context.dispatch(signal).await?)
    }
    Command::Click { notification } => {
      let notification: NotificationOptions = serde_json::from_str(&notification)
        .map_err(|e| eyre!("Invalid notification JSON: {}", e))?;
      print_outcome(&context.dispatch(Signal::NotificationClick(notification)).await?)
    }
    Command::Send { message } => {
      let value =
        serde_json::from_str(&message).map_err(|e| eyre!("Invalid message JSON: {}", e))?;
      send_message(&context, HostMessage::parse(value)?).await
    }
    Command::Queue(QueueCommand::List) => print_json(&context.queue().pending()?),
    Command::Notifications(NotificationsCommand::List) => {
      print_json(&context.scheduler().scheduled()?)
    }
    Command::Cache(CacheCommand::Status) => {
      let status: Vec<_> = context
        .cache()
        .status()?
        .into_iter()
        .map(|(version, entries)| {
          serde_json::json!({
            "version": version,
            "entries": entries,
            "current": version == context.cache().version(),
          })
        })
        .collect();
      print_json(&status)
    }
    Command::Serve { poll_secs } => serve(&context, Duration::from_secs(poll_secs.max(1))).await,
  }
}

/// Dispatch signals read from stdin until end of input.
async fn serve(context: &BackgroundContext<SqliteStore>, poll: Duration) -> Result<()> {
  let mut events = EventHandler::new(poll);

  while let Some(event) = events.next().await {
    match event {
      Event::Line(line) => {
        let result = match event::parse_signal(&line) {
          Ok(Signal::Message(message, _)) => send_message(context, message).await,
          Ok(signal) => match context.dispatch(signal).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => Err(e),
          },
          Err(e) => Err(e),
        };
        if let Err(e) = result {
          // One bad signal must not stop the loop
          warn!(error = %e, "Signal failed");
          print_json(&serde_json::json!({ "outcome": "error", "error": e.to_string() }))?;
        }
      }
      Event::Eof => break,
      Event::Tick => {
        debug!("Polling for due notifications");
        if let Err(e) = context.scheduler().deliver_due(&[]).await {
          warn!(error = %e, "Due-notification poll failed");
        }
      }
    }
  }

  Ok(())
}

/// Dispatch a host message and print its reply, if any.
async fn send_message(context: &BackgroundContext<SqliteStore>, message: HostMessage) -> Result<()> {
  let (tx, rx) = oneshot::channel();
  let outcome = context.dispatch(Signal::Message(message, Some(tx))).await?;
  print_outcome(&outcome)?;
  if let Ok(reply) = rx.await {
    print_json(&reply)?;
  }
  Ok(())
}

fn print_outcome(outcome: &Outcome) -> Result<()> {
  print_json(outcome)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let line = serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  let mut stdout = std::io::stdout().lock();
  writeln!(stdout, "{}", line).map_err(|e| eyre!("Failed to write output: {}", e))?;
  Ok(())
}
