//! HTTP/JSON client for remote bus instances.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use esb_core::labels;
use esb_core::wire::RemoteMessage;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::RemoteError;
use crate::traits::RemoteInvoker;

/// Header carrying the target service name.
pub const SERVICE_HEADER: &str = "switchyard-service";
/// Header carrying the base64-encoded security token.
pub const WS_SECURITY_HEADER: &str = "switchyard-webservice-security";

/// Endpoint and credentials for an [`HttpInvoker`].
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub security_token: Option<String>,
    pub timeout: Duration,
}

impl InvokerConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: None,
            password: None,
            security_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Posts [`RemoteMessage`]s as JSON to a single endpoint.
pub struct HttpInvoker {
    client: Client,
    endpoint: Url,
    config: InvokerConfig,
}

impl HttpInvoker {
    /// Validates the endpoint and builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::InvalidEndpoint` when the endpoint is not an
    /// absolute `http` or `https` URL.
    pub fn new(config: InvokerConfig) -> Result<Self, RemoteError> {
        let invalid = |reason: String| RemoteError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            reason,
        };
        let endpoint = Url::parse(&config.endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", endpoint.scheme())));
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn headers(&self, request: &RemoteMessage) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(SERVICE_HEADER, header_value(&request.service.to_string())?);

        for property in request.context.iter().filter(|p| p.has_label(labels::INVOKER_HEADER)) {
            let name = HeaderName::from_bytes(property.name().as_bytes())
                .map_err(|_| RemoteError::InvalidHeader(property.name().to_string()))?;
            let value = match property.value() {
                Value::String(s) => header_value(s)?,
                other => header_value(&other.to_string())?,
            };
            headers.insert(name, value);
        }

        if let Some(token) = &self.config.security_token {
            headers.insert(WS_SECURITY_HEADER, header_value(&STANDARD.encode(token))?);
        }
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, RemoteError> {
    HeaderValue::from_str(value).map_err(|_| RemoteError::InvalidHeader(value.to_string()))
}

#[async_trait]
impl RemoteInvoker for HttpInvoker {
    async fn invoke(&self, request: &RemoteMessage) -> Result<Option<RemoteMessage>, RemoteError> {
        let body = serde_json::to_vec(request)?;
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers(request)?)
            .body(body);
        if let Some(username) = &self.config.username {
            builder = builder.basic_auth(username, self.config.password.as_ref());
        }

        let response = builder.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            warn!(endpoint = %self.endpoint, service = %request.service, %status, "remote invocation returned no reply");
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        let reply: RemoteMessage = serde_json::from_slice(&bytes)?;
        debug!(endpoint = %self.endpoint, service = %request.service, fault = reply.fault, "remote reply received");
        Ok(Some(reply))
    }
}
