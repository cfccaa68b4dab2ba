//! HTTP access to the namespace proxy
//!
//! The namespace (catalog) is an external service. [`NamespaceClient`] owns
//! the connection pool, the service token and the error mapping;
//! [`HttpNamespaceProxy`] and [`HttpCredentialRevoker`] are thin typed views
//! over it.

mod client;
mod proxy;
mod revoker;

pub use client::{identity_header, NamespaceClient, IDENTITY_HEADER};
pub use proxy::HttpNamespaceProxy;
pub use revoker::HttpCredentialRevoker;

#[cfg(test)]
pub(crate) mod test_server;
