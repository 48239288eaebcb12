//! HTTP client for the platform's internal services

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::ControllerError;
use crate::models::deployment::AuthToken;
use crate::utils::user_agent;

/// Header the platform services authenticate with
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// HTTP client bound to one service
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<AuthToken>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        token: Option<AuthToken>,
        timeout: Duration,
    ) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTH_HEADER, token.expose()),
            None => request,
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControllerError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(ControllerError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }

    /// Make a POST request, discarding the response body
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ControllerError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(&url).json(body))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST failed: {} - {}", status, body);
            return Err(ControllerError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
