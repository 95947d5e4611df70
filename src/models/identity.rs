//! Identity token model
//!
//! An `IdentityToken` is the payload carried by a student's QR code. The
//! scanning side treats the subject identifier as opaque and only checks its
//! shape; it never looks inside it for personal data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator between the subject and the optional stamp segments
pub const SEGMENT_SEPARATOR: char = ';';

/// Decoded QR payload identifying one student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken {
    /// Opaque unique identifier of the student
    subject_id: String,
    /// When the code was issued, if stamped
    issued_at: Option<DateTime<Utc>>,
    /// Integrity tag over subject and issue time, if stamped
    checksum: Option<String>,
}

impl IdentityToken {
    /// Build a token. Callers are expected to have validated `subject_id`.
    pub(crate) fn new(
        subject_id: String,
        issued_at: Option<DateTime<Utc>>,
        checksum: Option<String>,
    ) -> Self {
        Self {
            subject_id,
            issued_at,
            checksum,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Canonical QR text for this token
    pub fn raw_text(&self) -> String {
        match (self.issued_at, &self.checksum) {
            (Some(issued_at), Some(checksum)) => format!(
                "{}{sep}t={}{sep}c={}",
                self.subject_id,
                issued_at.timestamp(),
                checksum,
                sep = SEGMENT_SEPARATOR
            ),
            (Some(issued_at), None) => format!(
                "{}{}t={}",
                self.subject_id,
                SEGMENT_SEPARATOR,
                issued_at.timestamp()
            ),
            _ => self.subject_id.clone(),
        }
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject_id)
    }
}

/// Integrity tag for a stamped token: first 4 bytes of
/// SHA-256 over `"<subject>|<unix seconds>"`, lowercase hex.
pub fn stamp_checksum(subject_id: &str, issued_at_secs: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_id.as_bytes());
    hasher.update(b"|");
    hasher.update(issued_at_secs.to_string().as_bytes());
    let digest = hasher.finalize();
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_raw_text_bare_subject() {
        let token = IdentityToken::new("STU-42".to_string(), None, None);
        assert_eq!(token.raw_text(), "STU-42");
        assert_eq!(token.to_string(), "STU-42");
    }

    #[test]
    fn test_raw_text_stamped_subject() {
        let issued_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let checksum = stamp_checksum("STU-42", 1_700_000_000);
        let token = IdentityToken::new("STU-42".to_string(), Some(issued_at), Some(checksum.clone()));

        assert_eq!(token.raw_text(), format!("STU-42;t=1700000000;c={}", checksum));
    }

    #[test]
    fn test_stamp_checksum_is_stable_and_short() {
        let a = stamp_checksum("STU-42", 10);
        let b = stamp_checksum("STU-42", 10);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, stamp_checksum("STU-43", 10));
        assert_ne!(a, stamp_checksum("STU-42", 11));
    }
}
