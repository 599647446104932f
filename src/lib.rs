// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod summarize;

// Sinks & notifications
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, ConfigHandle, Frequency, RepoConfig, TrackingLevel};
pub use crate::error::{CycleError, CycleResult};
pub use crate::scheduler::{CycleOutcome, Scheduler};
pub use crate::summarize::Summary;
