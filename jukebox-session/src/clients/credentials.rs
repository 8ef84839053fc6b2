//! HTTP credential source
//!
//! The token-issuing endpoint is a thin external service; this client only
//! fetches and decodes its answer.

use super::{CredentialSource, IssuedCredential};
use crate::error::TokenError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// `GET {token_url}` → `{ accessToken, expiresIn }`
pub struct HttpCredentialSource {
    client: reqwest::Client,
    token_url: String,
}

impl HttpCredentialSource {
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
        })
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> Result<IssuedCredential, TokenError> {
        debug!(url = %self.token_url, "Fetching credential");

        let response = self
            .client
            .get(&self.token_url)
            .send()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected { status, message });
        }

        let credential: IssuedCredential = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;

        if credential.access_token.is_empty() {
            return Err(TokenError::InvalidResponse("empty access token".to_string()));
        }

        Ok(credential)
    }
}
