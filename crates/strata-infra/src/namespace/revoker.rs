use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use strata_core::{AppError, CredentialRevoker};

use super::client::NamespaceClient;

#[derive(Serialize)]
struct RevokeBody<'a> {
    token: &'a str,
}

/// Revokes delegated source tokens through the proxy's credential endpoint.
#[derive(Clone)]
pub struct HttpCredentialRevoker {
    client: NamespaceClient,
}

impl HttpCredentialRevoker {
    pub fn new(client: NamespaceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialRevoker for HttpCredentialRevoker {
    async fn revoke(&self, token: &str) -> Result<(), AppError> {
        self.client
            .send_json(
                Method::POST,
                "credentials/revoke",
                None,
                None,
                &RevokeBody { token },
                "revoke credential",
            )
            .await?;
        tracing::debug!("Delegated credential revoked");
        Ok(())
    }
}
