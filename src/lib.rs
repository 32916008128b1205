//! Certificate-aware reverse proxy configuration reconciler.
//!
//! Watches a certificate store and a domain → upstream mapping, and keeps a
//! reverse proxy's dynamic configuration in step with them.
//!
//! # Architecture Overview
//!
//! ```text
//!   acme.json / live/        mapping.toml            SIGHUP
//!          │                      │                    │
//!          ▼                      ▼                    │
//!   ┌─────────────┐        ┌─────────────┐             │
//!   │   watcher   │        │   watcher   │             │
//!   │ + debounce  │        │ + debounce  │             │
//!   └──────┬──────┘        └──────┬──────┘             │
//!          └──────────┬───────────┴────────────────────┘
//!                     ▼
//!             ┌───────────────┐   mpsc queue, single consumer
//!             │   reconcile   │
//!             └───────┬───────┘
//!                     ▼
//!   store (load + extract) → descriptor (generate) → writer (atomic write + reload)
//!                                                           │
//!                                                           ▼
//!                                                dynamic.toml → proxy
//! ```
//!
//! Cross-cutting: `config`, `resilience` (backoff/retries), `lifecycle`
//! (startup/shutdown/signals), `observability` (tracing + metrics).

// Pipeline
pub mod descriptor;
pub mod reconcile;
pub mod store;
pub mod watcher;
pub mod writer;

// Cross-cutting concerns
pub mod cli;
pub mod config;
pub mod domain;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
