use std::sync::Arc;
use std::time::Duration;

use reqwest::{Body, Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::token::{TokenError, TokenProvider};
use crate::wire::{ChangesRequest, NewNode, NodeListPage, NodePayload};

const DEFAULT_ENDPOINT_URL: &str = "https://drive.amazonaws.com/drive/v1/account/endpoint";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to decode response body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("api returned {status} ({kind:?}): {body}")]
    Api {
        kind: ApiErrorKind,
        status: StatusCode,
        body: String,
    },
    #[error("credential error: {0}")]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    BadInput,
    InvalidCredential,
    Forbidden,
    DuplicateExists,
    ServerError,
    ServiceUnavailable,
    Unknown,
}

impl DriveError {
    pub fn kind(&self) -> Option<ApiErrorKind> {
        match self {
            DriveError::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Maps a response status onto the error taxonomy. `None` means success.
pub fn classify_status(status: StatusCode) -> Option<ApiErrorKind> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::BAD_REQUEST => ApiErrorKind::BadInput,
        StatusCode::UNAUTHORIZED => ApiErrorKind::InvalidCredential,
        StatusCode::FORBIDDEN => ApiErrorKind::Forbidden,
        StatusCode::CONFLICT => ApiErrorKind::DuplicateExists,
        StatusCode::INTERNAL_SERVER_ERROR => ApiErrorKind::ServerError,
        StatusCode::SERVICE_UNAVAILABLE => ApiErrorKind::ServiceUnavailable,
        _ => ApiErrorKind::Unknown,
    })
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint_url: String,
    /// Bounds every request; `None` means no timeout.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    pub content_url: String,
    pub metadata_url: String,
    #[serde(default)]
    pub customer_exists: bool,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    metadata_base: String,
    content_base: String,
    tokens: Arc<Mutex<TokenProvider>>,
}

impl DriveClient {
    /// Resolves the metadata and content endpoints through the discovery call.
    pub async fn discover(config: &ClientConfig, tokens: TokenProvider) -> Result<Self, DriveError> {
        let http = build_http(config.timeout)?;
        let tokens = Arc::new(Mutex::new(tokens));
        let url = Url::parse(&config.endpoint_url)?;
        let bearer = tokens.lock().await.access_token().await?;
        let response = http.get(url).bearer_auth(bearer).send().await?;
        let endpoints: Endpoints = Self::handle_response(response).await?;
        debug!(
            metadata_url = %endpoints.metadata_url,
            content_url = %endpoints.content_url,
            "resolved drive endpoints"
        );
        Self::from_parts(http, &endpoints.metadata_url, &endpoints.content_url, tokens)
    }

    pub fn with_endpoints(
        metadata_url: &str,
        content_url: &str,
        tokens: TokenProvider,
    ) -> Result<Self, DriveError> {
        Self::from_parts(
            build_http(None)?,
            metadata_url,
            content_url,
            Arc::new(Mutex::new(tokens)),
        )
    }

    fn from_parts(
        http: Client,
        metadata_url: &str,
        content_url: &str,
        tokens: Arc<Mutex<TokenProvider>>,
    ) -> Result<Self, DriveError> {
        Ok(Self {
            http,
            metadata_base: normalize_base(metadata_url)?,
            content_base: normalize_base(content_url)?,
            tokens,
        })
    }

    pub fn metadata_url(&self, relative: &str) -> Result<Url, DriveError> {
        join_endpoint(&self.metadata_base, relative)
    }

    pub fn content_url(&self, relative: &str) -> Result<Url, DriveError> {
        join_endpoint(&self.content_base, relative)
    }

    pub async fn list_nodes(
        &self,
        limit: u32,
        start_token: Option<&str>,
    ) -> Result<NodeListPage, DriveError> {
        let mut url = self.metadata_url("nodes")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(token) = start_token.filter(|t| !t.is_empty()) {
                query.append_pair("startToken", token);
            }
        }
        let response = self.execute(Method::GET, url, None).await?;
        Self::handle_response(response).await
    }

    /// Opens the change feed. The returned response has already passed the
    /// status check; its body is newline-delimited JSON.
    pub async fn changes(&self, request: &ChangesRequest) -> Result<Response, DriveError> {
        let url = self.metadata_url("changes")?;
        let body = serde_json::to_vec(request)?;
        self.execute(Method::POST, url, Some(body)).await
    }

    pub async fn create_node(&self, node: &NewNode) -> Result<NodePayload, DriveError> {
        let url = self.metadata_url("nodes")?;
        let body = serde_json::to_vec(node)?;
        let response = self.execute(Method::POST, url, Some(body)).await?;
        Self::handle_response(response).await
    }

    pub async fn trash_node(&self, id: &str) -> Result<(), DriveError> {
        let url = self.metadata_url(&format!("trash/{id}"))?;
        self.execute(Method::PUT, url, None).await?;
        Ok(())
    }

    pub async fn download_content(&self, id: &str) -> Result<Response, DriveError> {
        let url = self.content_url(&format!("nodes/{id}/content"))?;
        self.execute(Method::GET, url, None).await
    }

    /// Sends a pre-framed multipart body. The body may be a stream that is
    /// still being produced while the request is in flight.
    pub async fn upload_multipart(
        &self,
        method: Method,
        url: Url,
        content_type: &str,
        body: Body,
    ) -> Result<NodePayload, DriveError> {
        let bearer = self.bearer().await?;
        let response = self
            .http
            .request(method, url)
            .bearer_auth(bearer)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Sends a request with a JSON body. A 401 renews the token and retries
    /// once; when renewal is impossible the 401 is returned as is.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        json_body: Option<Vec<u8>>,
    ) -> Result<Response, DriveError> {
        let bearer = self.bearer().await?;
        let response = self
            .send(method.clone(), url.clone(), json_body.as_deref(), &bearer)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_response(response).await;
        }

        let renewed = self.tokens.lock().await.renew().await;
        let bearer = match renewed {
            Ok(bearer) => bearer,
            Err(err) => {
                debug!(error = %err, "bearer rejected and token not renewed");
                return Self::check_response(response).await;
            }
        };
        debug!(%url, "retrying with renewed token");
        let response = self.send(method, url, json_body.as_deref(), &bearer).await?;
        Self::check_response(response).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        json_body: Option<&[u8]>,
        bearer: &str,
    ) -> Result<Response, DriveError> {
        let mut request = self.http.request(method, url).bearer_auth(bearer);
        if let Some(body) = json_body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }
        Ok(request.send().await?)
    }

    async fn bearer(&self) -> Result<String, DriveError> {
        Ok(self.tokens.lock().await.access_token().await?)
    }

    async fn check_response(response: Response) -> Result<Response, DriveError> {
        let status = response.status();
        let Some(kind) = classify_status(status) else {
            return Ok(response);
        };
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "no response body".to_string());
        warn!(%status, ?kind, %url, body = %body, "drive api request failed");
        Err(DriveError::Api { kind, status, body })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, DriveError> {
        let response = Self::check_response(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn build_http(timeout: Option<Duration>) -> Result<Client, DriveError> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

fn normalize_base(base: &str) -> Result<String, DriveError> {
    Url::parse(base)?;
    if base.ends_with('/') {
        Ok(base.to_string())
    } else {
        Ok(format!("{base}/"))
    }
}

fn join_endpoint(base: &str, relative: &str) -> Result<Url, DriveError> {
    Ok(Url::parse(&format!(
        "{base}{}",
        relative.trim_start_matches('/')
    ))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_maps_known_codes() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(classify_status(StatusCode::CREATED), None);
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            Some(ApiErrorKind::BadInput)
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            Some(ApiErrorKind::InvalidCredential)
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            Some(ApiErrorKind::Forbidden)
        );
        assert_eq!(
            classify_status(StatusCode::CONFLICT),
            Some(ApiErrorKind::DuplicateExists)
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(ApiErrorKind::ServerError)
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(ApiErrorKind::ServiceUnavailable)
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(ApiErrorKind::Unknown)
        );
    }

    #[test]
    fn endpoints_join_with_or_without_trailing_slash() {
        let client = DriveClient::with_endpoints(
            "https://meta.example/drive/v1",
            "https://content.example/cdproxy/",
            TokenProvider::fixed("t"),
        )
        .unwrap();

        assert_eq!(
            client.metadata_url("nodes").unwrap().as_str(),
            "https://meta.example/drive/v1/nodes"
        );
        assert_eq!(
            client.metadata_url("/trash/abc").unwrap().as_str(),
            "https://meta.example/drive/v1/trash/abc"
        );
        assert_eq!(
            client
                .content_url("nodes?suppress=deduplication")
                .unwrap()
                .as_str(),
            "https://content.example/cdproxy/nodes?suppress=deduplication"
        );
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let result = DriveClient::with_endpoints("not a url", "also not", TokenProvider::fixed("t"));
        assert!(matches!(result, Err(DriveError::Url(_))));
    }
}
