//! Threshold notifications
//!
//! Evaluates observation batches against configured rules, throttles the
//! resulting notifications per rule and globally, and dispatches them with
//! backoff after endpoint errors.

pub mod dispatcher;
pub mod engine;
pub mod evaluator;
pub mod message;
pub mod rule;
pub mod service;
pub mod state;
pub mod throttle;

pub use dispatcher::{
    DispatchOutcome, DispatchStatus, Dispatcher, LogTransport, NotificationResult,
    PushoverTransport, Transport, TransportError,
};
pub use engine::NotifyEngine;
pub use evaluator::{Candidate, CandidateKind};
pub use message::NotificationRequest;
pub use rule::{RuleDefinition, RuleId, RuleKind, RuleStore};
pub use service::{NotifyService, DEFAULT_QUEUE_CAPACITY};
pub use state::{NotifierState, RuleState, SharedNotifierState};
pub use throttle::{GateDecision, ThrottleController};
