//! Queue consumers
//!
//! One worker type per job kind, each running an independent
//! dequeue -> process -> ack/nack loop. Business failures are recorded and
//! never escape a worker; only queue/storage faults propagate out of
//! `run()`, at which point the owning process restarts and lease expiry
//! takes care of anything left in flight.

pub mod analytics;
pub mod publish;

pub use analytics::AnalyticsWorker;
pub use publish::PublishWorker;
