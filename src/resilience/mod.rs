//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transient failure (store read, descriptor write, reload hook, lost watch):
//!     → retries.rs (bounded attempts)
//!     → backoff.rs (exponential delay + jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Only transient failures are retried; data errors surface immediately
//! - Jittered backoff avoids lockstep retries against a busy filesystem
//! - Every retry loop has a finite budget

pub mod backoff;
pub mod retries;

pub use backoff::BackoffPolicy;
pub use retries::retry_with_backoff;
