//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! Watch queue (mpsc)
//!     → driver.rs (dequeue, coalesce per kind, shutdown between cycles)
//!     → reconciler.rs (one cycle):
//!           Idle → Extracting → Generating → Writing → Idle
//!                        └──── any failure ────→ Degraded
//! ```
//!
//! # Design Decisions
//! - One task owns `ReconciliationState`; no locks
//! - Equal digests short-circuit before any filesystem write
//! - A failed cycle never replaces the live descriptor
//! - A watcher that gives up ends the loop with a fatal error

pub mod driver;
pub mod reconciler;
pub mod types;

pub use driver::{LoopError, ReconcileLoop};
pub use reconciler::Reconciler;
pub use types::{CycleError, CycleOutcome, ErrorClass, Phase, ReconciliationState, Stage};
