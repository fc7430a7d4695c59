use std::path::{Path, PathBuf};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};
use url::Url;

const DEFAULT_REFRESH_URL: &str = "https://go-acd.appspot.com/refresh";
const EXPIRY_DELTA: Duration = Duration::seconds(10);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("token JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("refresh request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid refresh url: {0}")]
    Url(#[from] url::ParseError),
    #[error("refresh service returned {status}: {body}")]
    Refresh { status: StatusCode, body: String },
    #[error("token cannot be renewed without a refresh token and service")]
    NotRenewable,
}

/// Credentials in the layout of the token file. A missing expiry, or the
/// zero time `0001-01-01T00:00:00Z`, means the token does not expire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry: Option<OffsetDateTime>,
}

impl Token {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".into()),
            refresh_token: None,
            expiry: None,
        }
    }

    /// Usable at `now`, with a small margin before the expiry.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) if expiry.year() > 1 => expiry - EXPIRY_DELTA > now,
            _ => true,
        }
    }
}

/// The refresh service takes the whole token as JSON and answers with the
/// renewed token.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    http: Client,
    url: Url,
}

impl TokenRefresher {
    pub fn new(url: &str) -> Result<Self, TokenError> {
        Ok(Self {
            http: Client::new(),
            url: Url::parse(url)?,
        })
    }

    pub fn default_service() -> Result<Self, TokenError> {
        Self::new(DEFAULT_REFRESH_URL)
    }

    /// A renewed token without a refresh token keeps the current one.
    pub async fn refresh(&self, token: &Token) -> Result<Token, TokenError> {
        let response = self.http.post(self.url.clone()).json(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Refresh { status, body });
        }
        let mut renewed: Token = response.json().await?;
        if renewed.refresh_token.is_none() {
            renewed.refresh_token.clone_from(&token.refresh_token);
        }
        Ok(renewed)
    }
}

/// Bearer source for the drive client. Expired tokens are renewed through the
/// refresh service and written back to the file they were read from.
pub struct TokenProvider {
    token: Token,
    refresher: Option<TokenRefresher>,
    token_file: Option<PathBuf>,
}

impl TokenProvider {
    pub fn new(token: Token, refresher: Option<TokenRefresher>) -> Self {
        Self {
            token,
            refresher,
            token_file: None,
        }
    }

    /// A token that never expires and is never renewed.
    pub fn fixed(access_token: impl Into<String>) -> Self {
        Self::new(Token::bearer(access_token), None)
    }

    pub async fn from_file(path: &Path, refresher: Option<TokenRefresher>) -> Result<Self, TokenError> {
        let bytes = tokio::fs::read(path).await?;
        let token: Token = serde_json::from_slice(&bytes)?;
        let mut provider = Self::new(token, refresher);
        provider.token_file = Some(path.to_path_buf());
        Ok(provider)
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub async fn access_token(&mut self) -> Result<String, TokenError> {
        if !self.token.is_valid_at(OffsetDateTime::now_utc()) {
            debug!(expiry = ?self.token.expiry, "access token expired");
            return self.renew().await;
        }
        Ok(self.token.access_token.clone())
    }

    /// Renews whether or not the token looks expired. The client calls this
    /// once after the API rejects a bearer.
    pub async fn renew(&mut self) -> Result<String, TokenError> {
        let refresher = self.refresher.as_ref().ok_or(TokenError::NotRenewable)?;
        if self.token.refresh_token.is_none() {
            return Err(TokenError::NotRenewable);
        }
        self.token = refresher.refresh(&self.token).await?;
        info!(expiry = ?self.token.expiry, "renewed access token");

        if let Some(path) = &self.token_file {
            tokio::fs::write(path, serde_json::to_vec(&self.token)?).await?;
            debug!(path = %path.display(), "saved renewed token");
        }
        Ok(self.token.access_token.clone())
    }
}
