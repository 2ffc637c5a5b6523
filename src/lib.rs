//! Stationwatch: threshold notifications for weather station readings
//!
//! Each batch of readings (a real-time loop packet or an archive record) is
//! checked against configured min/max/equal/missing rules. A rule notifies
//! only after its condition holds for a run of consecutive batches, repeats
//! no more often than its wait time, and can send one notification when the
//! condition clears. Delivery goes to a Pushover-compatible endpoint; client
//! errors halt sending and server errors suspend it for a while.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stationwatch::clock::SystemClock;
//! use stationwatch::notify::{
//!     Dispatcher, LogTransport, NotifierState, NotifyEngine, NotifyService, RuleDefinition,
//!     RuleKind, RuleStore, ThrottleController,
//! };
//! use stationwatch::observation::{Binding, ObservationBatch};
//!
//! # async fn run() {
//! let clock = Arc::new(SystemClock);
//! let notifier = NotifierState::shared(true);
//! let rules = RuleStore::new(vec![RuleDefinition::new(
//!     "outTemp",
//!     Binding::Loop,
//!     RuleKind::Max { value: 100.0 },
//! )
//! .with_count(3)]);
//!
//! let engine = Arc::new(NotifyEngine::new(
//!     rules,
//!     Arc::clone(&notifier),
//!     ThrottleController::new(chrono::Duration::seconds(3600)),
//!     clock.clone(),
//! ));
//! let dispatcher = Dispatcher::new(Arc::new(LogTransport), notifier, clock);
//! let (service, _worker) = NotifyService::start(engine, dispatcher, 64);
//!
//! let batch = ObservationBatch::new(Binding::Loop, chrono::Utc::now()).with_value("outTemp", 104.0);
//! service.submit(&batch);
//! # }
//! ```

pub mod api;
pub mod clock;
pub mod config;
pub mod notify;
pub mod observation;

// Re-export commonly used types
pub use config::{ConfigError, Settings};
pub use observation::{Binding, ObservationBatch};
