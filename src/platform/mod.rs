//! Seams to the host environment.
//!
//! Everything the engine cannot do by itself goes through one of these
//! traits: network I/O, deferred wake registration, displaying
//! notifications, talking to open host windows and reading the clock.

mod clients;
mod clock;
mod network;
mod surface;
mod wake;

pub use clients::{ClientWindow, Clients, ConsoleClients};
#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use network::{Body, FetchRequest, FetchResponse, HttpNetwork, Network, ResponseSource};
pub use surface::{ConsoleSurface, NotificationOptions, NotificationSurface};
pub use wake::{LedgerWakeScheduler, WakeScheduler, WakeTag};
