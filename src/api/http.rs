//! reqwest implementation of the attendance backend

use async_trait::async_trait;
use std::fmt;

use super::{AttendanceBackend, BackendReply, TransportError, MY_QR_CODE_PATH, SCAN_PATH};
use crate::config::ApiConfig;
use crate::models::{ApiEnvelope, MyQrCode, ScanData, ScanRequest};

/// Bearer credential for the backend
#[derive(Clone, Default)]
pub struct Credentials {
    token: Option<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.trim();
        Self {
            token: (!token.is_empty()).then(|| token.to_string()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }

    /// Resolve the credential from configuration.
    ///
    /// `api.token` wins over `api.token_file`; with neither, requests are sent
    /// without an `Authorization` header.
    pub fn resolve(config: &ApiConfig) -> std::io::Result<Self> {
        if let Some(token) = &config.token {
            return Ok(Self::bearer(token.as_str()));
        }
        if let Some(path) = &config.token_file {
            let token = std::fs::read_to_string(path)?;
            return Ok(Self::bearer(token));
        }
        Ok(Self::anonymous())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// HTTP transport to the attendance backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpBackend {
    pub fn new(config: &ApiConfig, credentials: Credentials) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("attendance-checkin/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl AttendanceBackend for HttpBackend {
    async fn record_scan(&self, request: &ScanRequest) -> Result<BackendReply, TransportError> {
        let response = self
            .authorize(self.client.post(self.url(SCAN_PATH)))
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = match serde_json::from_str::<ApiEnvelope<ScanData>>(&text) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Scan response ({}) is not an envelope: {}", status, e);
                ApiEnvelope::default()
            }
        };

        Ok(BackendReply { status, body })
    }

    async fn fetch_my_qr_code(&self) -> Result<MyQrCode, TransportError> {
        let response = self
            .authorize(self.client.get(self.url(MY_QR_CODE_PATH)))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let envelope: ApiEnvelope<MyQrCode> = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                TransportError::InvalidResponse(e.to_string())
            } else {
                TransportError::Status {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("error").to_string(),
                }
            }
        })?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("error").to_string()
                }),
            });
        }

        envelope
            .data
            .ok_or_else(|| TransportError::InvalidResponse("missing data".into()))
    }
}
