//! Integrity-state engine: baseline scanning, fingerprinting and event
//! reconciliation for a watched directory tree.

pub mod alert;
pub mod baseline;
pub mod config;
pub mod digest;
pub mod error;
pub mod event;
pub mod reconciler;
pub mod scanner;

pub use alert::{Alert, AlertKind, AlertSink};
pub use baseline::{Baseline, BaselineStore};
pub use digest::{Digest, FileHasher, Fingerprint, Fingerprinter, HashAlgorithm};
pub use error::{Result, WardenError};
pub use event::FsEvent;
pub use reconciler::{Outcome, Reconciler};
pub use scanner::{ScanError, ScanReport, Scanner};
