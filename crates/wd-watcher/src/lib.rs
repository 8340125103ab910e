//! Directory watch engine with debounced version counters.
//!
//! This crate watches a set of root directories recursively and, after a
//! burst of changes under a root has been quiet for a grace period, bumps
//! the `[General] Version` key of that root's `gpt.ini` file by exactly one.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        WatchController                           │
//! │   start / stop / update_dirs (serialised)      dirs / state      │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ owns at most one
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Session task (tokio)                                             │
//! │  ┌────────────────────┐  callback  ┌──────────────────────────┐  │
//! │  │ RecommendedWatcher │ ─────────► │ Coalescer::run           │  │
//! │  │ (notify)           │  channel   │  ├─ classify()           │  │
//! │  └─────────▲──────────┘            │  ├─ Registrar            │  │
//! │            │ subscribe/unsubscribe │  ├─ resolve_root()       │  │
//! │            └───────────────────────│  └─ counter::bump()      │  │
//! │                                    └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! wd-cli ──► wd-watcher ──► wd-core
//!        └──────────────────►
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use camino::Utf8PathBuf;
//! use wd_watcher::WatchController;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wd_watcher::WatchError> {
//!     let controller = WatchController::new(tracing::info_span!("watch"));
//!     let dirs = vec![Utf8PathBuf::from("/srv/sysvol/example.com/Policies")];
//!
//!     controller.start(&dirs, Duration::from_secs(10)).await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     controller.stop().await
//! }
//! ```
//!
//! # Error Handling
//!
//! Only lifecycle operations return errors. Failures while a session is
//! running (a root whose counter cannot be written, a file that vanished
//! before it could be inspected) are logged and the session keeps watching.
//!
//! ```
//! use wd_watcher::WatchError;
//!
//! fn report(err: &WatchError) -> &'static str {
//!     if err.is_fatal() { "operation aborted" } else { "logged and ignored" }
//! }
//!
//! assert_eq!(report(&WatchError::NotRunning), "operation aborted");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod coalescer;
pub mod controller;
pub mod counter;
pub mod error;
pub mod events;
pub mod registrar;
pub mod resolver;
mod session;

pub use coalescer::Coalescer;
pub use controller::{LifecycleState, WatchController};
pub use error::WatchError;
pub use events::{classify, ChangeKind, FileEvent};
pub use registrar::{Registrar, Subscriber};
pub use resolver::resolve_root;
