//! Data models
//!
//! This module contains the data structures shared by the check-in components.
//! Models represent:
//! - QR identity payloads (IdentityToken)
//! - Scan outcomes kept for the operator (ScanAttempt)
//! - The operator's session context (SessionContext, ScanStatus)
//! - Attendance backend request/response types

mod attendance;
mod identity;
mod scan;
mod session;

pub use attendance::{ApiEnvelope, AttendanceStatus, MyQrCode, ScanData, ScanRequest, StudentInfo};
pub use identity::{stamp_checksum, IdentityToken, SEGMENT_SEPARATOR};
pub use scan::{ScanAttempt, ScanOutcome};
pub use session::{ScanStatus, SessionContext};
