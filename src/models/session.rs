//! Scan session context model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible state of a scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Idle,
    CameraStarting,
    CameraActive,
    Submitting,
    Cooldown,
    CameraError,
    Closed,
}

impl ScanStatus {
    /// Whether a decoded frame would be taken up in this state
    pub fn accepts_decodes(&self) -> bool {
        *self == ScanStatus::CameraActive
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Idle => write!(f, "idle"),
            ScanStatus::CameraStarting => write!(f, "camera_starting"),
            ScanStatus::CameraActive => write!(f, "camera_active"),
            ScanStatus::Submitting => write!(f, "submitting"),
            ScanStatus::Cooldown => write!(f, "cooldown"),
            ScanStatus::CameraError => write!(f, "camera_error"),
            ScanStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Operator's current scanning configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Group scans are recorded against; submissions need it set
    pub target_group_id: Option<String>,
    pub camera_state: ScanStatus,
}

impl SessionContext {
    /// The target group, if set and non-blank
    pub fn target_group(&self) -> Option<&str> {
        self.target_group_id
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}
