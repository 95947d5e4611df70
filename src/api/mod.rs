//! Attendance backend client
//!
//! This module contains the transport used to talk to the attendance REST
//! backend. It includes:
//! - The `AttendanceBackend` trait the submission client is written against
//! - `HttpBackend`, the reqwest implementation
//! - Bearer credential resolution

pub mod http;


use async_trait::async_trait;

use crate::models::{ApiEnvelope, MyQrCode, ScanData, ScanRequest};

pub use http::{Credentials, HttpBackend};

/// Path of the scan recording endpoint
pub const SCAN_PATH: &str = "/api/attendance/scan";
/// Path of the student's own QR code endpoint
pub const MY_QR_CODE_PATH: &str = "/api/students/my-qr-code";

/// Transport-level failures talking to the backend
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// The backend could not be reached
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Any other HTTP client failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status on an endpoint that has no business outcome
    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The backend answered with a body we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

/// Status and parsed body of a scan response
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub status: u16,
    pub body: ApiEnvelope<ScanData>,
}

impl BackendReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The attendance record store, as seen from the scanning client
#[async_trait]
pub trait AttendanceBackend: Send + Sync {
    /// Record one scan. Any HTTP status is a reply; only transport failures are errors.
    async fn record_scan(&self, request: &ScanRequest) -> Result<BackendReply, TransportError>;

    /// Fetch the signed-in student's QR code
    async fn fetch_my_qr_code(&self) -> Result<MyQrCode, TransportError>;
}
