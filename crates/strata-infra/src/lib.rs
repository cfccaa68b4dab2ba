//! Strata Infrastructure Library
//!
//! Production implementations of the collaborator contracts declared in
//! `strata-core`, and process-level plumbing shared by the binaries:
//! - Telemetry initialization (`tracing-subscriber`, text or JSON)
//! - Tracing-backed transfer event emitter
//! - HTTP client for the namespace proxy and the credential revocation endpoint
//! - Error bodies returned by the namespace proxy

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;
pub mod events;

#[cfg(feature = "namespace-http")]
pub mod namespace;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat, TelemetryConfig};

pub use error::ErrorResponse;
pub use events::TracingEventEmitter;

#[cfg(feature = "namespace-http")]
pub use namespace::{HttpCredentialRevoker, HttpNamespaceProxy, NamespaceClient};
