//! Route descriptor subsystem.
//!
//! # Data Flow
//! ```text
//! CertificateBundle + MappingConfig
//!     → generator.rs (one ServiceRoute per mapped domain)
//!     → render.rs (Traefik dynamic config, TOML)
//!     → RouteDescriptor { services, certificates, bytes, digest }
//! ```
//!
//! # Design Decisions
//! - Descriptors are regenerated wholesale, never patched
//! - Rendering is deterministic so the digest is a reliable change detector
//! - Certificates appear only as fingerprints and exported file paths

pub mod generator;
pub mod render;
pub mod types;

pub use generator::generate;
pub use types::{
    CertificateRef, ExportedFiles, GenerateError, RenderSettings, RouteDescriptor, ServiceRoute,
};
