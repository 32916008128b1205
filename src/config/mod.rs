//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! mapping file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MappingConfig (validated, immutable)
//!     → owned by the reconciliation loop
//!
//! On mapping change:
//!     watcher emits a Mapping event
//!     → loader.rs loads new mapping
//!     → validation.rs validates
//!     → loop replaces its mapping and reconciles
//! ```
//!
//! # Design Decisions
//! - Mapping is immutable once loaded; changes require full reload
//! - A mapping that fails to load never replaces the current one
//! - Runtime settings (`ReconcilerConfig`) come from the command line

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_mapping, ConfigError};
pub use schema::{
    LogFormat, MappingConfig, ObservabilityConfig, ProxySettings, ReconcilerConfig,
    ReloadConfig, RetryConfig, RouteMapping, StoreConfig, StoreFormat, WatchConfig,
};
pub use validation::ValidationError;
