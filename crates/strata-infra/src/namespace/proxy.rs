use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use strata_core::models::{CollectionListing, SystemGeneratedMetadata, SystemMetadataUpdate};
use strata_core::{AppError, NamespaceIdentity, NamespaceProxy, PathKind};

use super::client::{identity_header, NamespaceClient};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum WireKind {
    DataObject,
    Collection,
}

#[derive(Debug, Deserialize)]
struct KindBody {
    kind: WireKind,
}

#[derive(Debug, Deserialize)]
struct PathBody {
    path: String,
}

#[derive(Debug, Serialize)]
struct SessionBody<'a> {
    identity: &'a str,
}

/// [`NamespaceProxy`] over the namespace proxy's REST API.
#[derive(Clone)]
pub struct HttpNamespaceProxy {
    client: NamespaceClient,
}

impl HttpNamespaceProxy {
    pub fn new(client: NamespaceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceProxy for HttpNamespaceProxy {
    async fn authenticate(&self, identity: &NamespaceIdentity) -> Result<(), AppError> {
        let header = identity_header(identity);
        self.client
            .send_json(
                Method::POST,
                "session",
                None,
                Some(identity),
                &SessionBody { identity: &header },
                "authenticate",
            )
            .await
    }

    async fn path_kind(&self, path: &str) -> Result<Option<PathKind>, AppError> {
        let body: Option<KindBody> = self
            .client
            .get_optional("paths/kind", Some(path), "path kind")
            .await?;
        Ok(body.map(|body| match body.kind {
            WireKind::DataObject => PathKind::DataObject,
            WireKind::Collection => PathKind::Collection,
        }))
    }

    async fn absolute_path(&self, path: &str) -> Result<String, AppError> {
        let body: PathBody = self
            .client
            .get_json("paths/absolute", Some(path), "absolute path")
            .await?;
        Ok(body.path)
    }

    async fn relative_path(&self, absolute_path: &str) -> Result<String, AppError> {
        let body: PathBody = self
            .client
            .get_json("paths/relative", Some(absolute_path), "relative path")
            .await?;
        Ok(body.path)
    }

    #[tracing::instrument(skip(self))]
    async fn get_system_generated_metadata(
        &self,
        path: &str,
    ) -> Result<SystemGeneratedMetadata, AppError> {
        self.client
            .get_json("metadata", Some(path), "system generated metadata")
            .await
    }

    #[tracing::instrument(skip(self, update), fields(identity = %identity.id()))]
    async fn update_system_generated_metadata(
        &self,
        identity: &NamespaceIdentity,
        path: &str,
        update: SystemMetadataUpdate,
    ) -> Result<(), AppError> {
        self.client
            .send_json(
                Method::PATCH,
                "metadata",
                Some(path),
                Some(identity),
                &update,
                "update system generated metadata",
            )
            .await
    }

    async fn list_collection(&self, path: &str) -> Result<CollectionListing, AppError> {
        self.client
            .get_json("collections", Some(path), "list collection")
            .await
    }
}
