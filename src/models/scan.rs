//! Scan attempt model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Final classification of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Backend recorded the attendance
    Accepted,
    /// Backend already had a record for this subject in the session window
    DuplicateSuppressed,
    /// Backend refused the scan for a business reason
    Rejected,
    /// Backend could not be reached, even after the retry
    NetworkError,
}

impl ScanOutcome {
    /// Whether the operator should treat this as a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, ScanOutcome::Rejected | ScanOutcome::NetworkError)
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanOutcome::Accepted => write!(f, "accepted"),
            ScanOutcome::DuplicateSuppressed => write!(f, "duplicate"),
            ScanOutcome::Rejected => write!(f, "rejected"),
            ScanOutcome::NetworkError => write!(f, "network error"),
        }
    }
}

/// One decode event and how it resolved.
///
/// Built once from its resolution and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanAttempt {
    /// Local identifier
    pub id: Uuid,
    /// Decoded QR text as read from the device
    pub raw_text: String,
    /// Subject the scan was submitted for
    pub subject_id: String,
    /// Group the scan was submitted against
    pub group_id: String,
    /// When the decoder produced the text
    pub captured_at: DateTime<Utc>,
    /// When the submission resolved
    pub resolved_at: DateTime<Utc>,
    pub outcome: ScanOutcome,
    /// Student display name echoed by the backend
    pub student_name: Option<String>,
    /// Human-readable message from the backend or transport
    pub message: Option<String>,
}

impl ScanAttempt {
    /// Finalize a scan with its one and only outcome
    pub fn resolved(
        raw_text: impl Into<String>,
        subject_id: impl Into<String>,
        group_id: impl Into<String>,
        captured_at: DateTime<Utc>,
        outcome: ScanOutcome,
        student_name: Option<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_text: raw_text.into(),
            subject_id: subject_id.into(),
            group_id: group_id.into(),
            captured_at,
            resolved_at: Utc::now(),
            outcome,
            student_name,
            message,
        }
    }
}
