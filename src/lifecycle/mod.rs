//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load mapping → Open store → Start watchers → Initial cycle → Loop
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Finish in-flight cycle → Stop watchers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Queue a manual reconciliation
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and exits non-zero
//! - Nothing interrupts a write in progress

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
