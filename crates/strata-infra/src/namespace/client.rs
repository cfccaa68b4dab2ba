use std::time::Duration;

use anyhow::Context;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_core::{AppError, Config, NamespaceIdentity};

use crate::error::ErrorResponse;

/// Header carrying the identity a call runs as
pub const IDENTITY_HEADER: &str = "x-strata-identity";

/// Path separators stay readable in query strings
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn identity_header(identity: &NamespaceIdentity) -> String {
    match identity {
        NamespaceIdentity::User(id) => format!("user:{}", id),
        NamespaceIdentity::System(id) => format!("system:{}", id),
    }
}

#[derive(Clone)]
pub struct NamespaceClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl NamespaceClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create namespace proxy HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let base_url = config
            .namespace_proxy_url()
            .context("NAMESPACE_PROXY_URL is not configured")?;
        Self::new(
            base_url,
            config.namespace_proxy_token().map(str::to_string),
            Duration::from_secs(30),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/v1/{endpoint}`, with `path` as the encoded `path` query parameter.
    pub fn build_url(&self, endpoint: &str, path: Option<&str>) -> String {
        let endpoint = endpoint.trim_start_matches('/');
        match path {
            Some(path) => format!(
                "{}/v1/{}?path={}",
                self.base_url,
                endpoint,
                utf8_percent_encode(path, QUERY_VALUE)
            ),
            None => format!("{}/v1/{}", self.base_url, endpoint),
        }
    }

    fn request(
        &self,
        method: Method,
        endpoint: &str,
        path: Option<&str>,
        identity: Option<&NamespaceIdentity>,
    ) -> RequestBuilder {
        let mut builder = self.client.request(method, self.build_url(endpoint, path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(identity) = identity {
            builder = builder.header(IDENTITY_HEADER, identity_header(identity));
        }
        builder
    }

    async fn execute(&self, builder: RequestBuilder, context: &str) -> Result<Response, AppError> {
        let response = builder.send().await.map_err(|e| {
            AppError::Backend(format!("{}: namespace proxy unreachable: {}", context, e))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), context, "Namespace proxy call failed");
        Err(ErrorResponse::parse(&body).into_app_error(status.as_u16(), context))
    }

    async fn decode<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, AppError> {
        response.json::<T>().await.map_err(|e| {
            AppError::Backend(format!("{}: invalid namespace proxy response: {}", context, e))
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: Option<&str>,
        context: &str,
    ) -> Result<T, AppError> {
        let response = self
            .execute(self.request(Method::GET, endpoint, path, None), context)
            .await?;
        Self::decode(response, context).await
    }

    /// Like [`get_json`](Self::get_json), but a 404 is `None`.
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: Option<&str>,
        context: &str,
    ) -> Result<Option<T>, AppError> {
        let builder = self.request(Method::GET, endpoint, path, None);
        let response = builder.send().await.map_err(|e| {
            AppError::Backend(format!("{}: namespace proxy unreachable: {}", context, e))
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorResponse::parse(&body).into_app_error(status, context));
        }
        Self::decode(response, context).await.map(Some)
    }

    /// Send `body` as JSON and ignore the response body.
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        path: Option<&str>,
        identity: Option<&NamespaceIdentity>,
        body: &B,
        context: &str,
    ) -> Result<(), AppError> {
        let builder = self.request(method, endpoint, path, identity).json(body);
        self.execute(builder, context).await?;
        Ok(())
    }
}
