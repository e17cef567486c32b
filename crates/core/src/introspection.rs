//! Bearer token introspection.
//!
//! The introspection authority receives `token=<credential>&patient=<subject>` as a form POST
//! and answers with a JSON object carrying the granted `scope` string. Any deviation from that
//! contract is an [`GatewayError::IntrospectionRejected`]; the gatekeeper turns it into a denial.

use crate::config::GatewayConfig;
use crate::{GatewayError, GatewayResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// What the authority said about one credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntrospectionResult {
    /// Subject the token was issued for, or the requested subject when the authority omits it.
    pub subject: String,
    /// Raw scope string as returned.
    pub scope: String,
}

impl IntrospectionResult {
    /// Individual scope entries. Entries are separated by whitespace or commas.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
    }
}

/// Validates a bearer credential for a subject.
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`GatewayError::IntrospectionRejected`] if the authority cannot be reached or
    /// does not confirm the credential.
    async fn introspect(&self, token: &str, subject: &str) -> GatewayResult<IntrospectionResult>;
}

#[derive(Deserialize)]
struct IntrospectionWire {
    scope: Option<String>,
    active: Option<bool>,
    sub: Option<String>,
    patient: Option<String>,
}

/// [`TokenIntrospector`] backed by an HTTP introspection endpoint.
#[derive(Clone, Debug)]
pub struct HttpIntrospectionClient {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpIntrospectionClient {
    pub fn new(config: &GatewayConfig, client: reqwest::Client) -> Self {
        Self {
            url: config.introspection_url().to_string(),
            client,
            timeout: config.upstream_timeout(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenIntrospector for HttpIntrospectionClient {
    async fn introspect(&self, token: &str, subject: &str) -> GatewayResult<IntrospectionResult> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("token", token), ("patient", subject)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| rejected(format!("introspection call to {} failed: {e}", self.url)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(rejected(format!("introspection returned {status}")));
        }

        let content_types: Vec<_> = response.headers().get_all(CONTENT_TYPE).iter().collect();
        let json_content = match content_types.as_slice() {
            [single] => single.to_str().is_ok_and(|v| v.contains("json")),
            _ => false,
        };
        if !json_content {
            return Err(rejected(format!(
                "introspection answered with {} content type header(s), expected one JSON type",
                content_types.len()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| rejected(format!("failed to read introspection body: {e}")))?;
        if body.is_empty() {
            return Err(rejected("introspection body is empty".into()));
        }

        let wire: IntrospectionWire = serde_json::from_slice(&body)
            .map_err(|e| rejected(format!("introspection body is not a JSON object: {e}")))?;

        if wire.active == Some(false) {
            return Err(rejected("token is not active".into()));
        }
        let scope = wire
            .scope
            .ok_or_else(|| rejected("introspection response has no scope".into()))?;

        Ok(IntrospectionResult {
            subject: wire
                .patient
                .or(wire.sub)
                .unwrap_or_else(|| subject.to_string()),
            scope,
        })
    }
}

fn rejected(reason: String) -> GatewayError {
    GatewayError::IntrospectionRejected(reason)
}
