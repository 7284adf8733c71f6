//! Runtime pieces of the warden service: the filesystem watcher, the
//! reconciliation loop, the audit sweep and the alert sinks.

pub mod audit;
pub mod monitor;
pub mod sinks;
pub mod watcher;
