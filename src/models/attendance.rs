//! Attendance backend wire types
//!
//! Request and response bodies exchanged with the attendance REST backend.
//! Field names follow the backend's camelCase JSON.

use serde::{Deserialize, Serialize};

use crate::services::render::{decode_data_uri, RenderError};

/// Attendance status sent with a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
}

/// Body of `POST /api/attendance/scan`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub student_id: String,
    pub group_id: String,
    pub status: AttendanceStatus,
}

impl ScanRequest {
    pub fn present(student_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            group_id: group_id.into(),
            status: AttendanceStatus::Present,
        }
    }
}

/// Standard backend response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    /// Machine-readable error code, when the backend sends one
    #[serde(default)]
    pub code: Option<String>,
}

impl<T> Default for ApiEnvelope<T> {
    fn default() -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            code: None,
        }
    }
}

/// `data` of a successful scan response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanData {
    #[serde(default)]
    pub student: Option<StudentInfo>,
}

/// Student as echoed by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `data` of `GET /api/students/my-qr-code`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyQrCode {
    /// Server-rendered image as a data URI
    pub qr_code_image: String,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub student_number: Option<String>,
}

impl MyQrCode {
    /// Decode the server-rendered image
    pub fn image_bytes(&self) -> Result<Vec<u8>, RenderError> {
        decode_data_uri(&self.qr_code_image)
    }
}
