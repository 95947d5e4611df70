//! Attendance submission client
//!
//! Turns a decoded identity into one logical scan submission:
//! - fails fast with `InvalidState` when no target group is set
//! - retries once on transport failure or 5xx, then gives up
//! - classifies the backend reply into a `ScanOutcome`
//! - records the resolved `ScanAttempt` in the scan history

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{AttendanceBackend, BackendReply, TransportError};
use crate::models::{IdentityToken, ScanAttempt, ScanOutcome, ScanRequest};
use crate::services::history::ScanHistory;

/// Total tries per submission: the first one plus a single retry
const MAX_TRIES: u32 = 2;

/// Machine-readable codes the backend may send for a repeat scan
const DUPLICATE_CODES: &[&str] = &["DUPLICATE_ATTENDANCE", "ALREADY_RECORDED"];

/// Message fragments that mark a repeat scan
const DUPLICATE_MARKERS: &[&str] = &["already", "duplicate"];

/// Error types for submission preconditions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// Submission attempted without a target group
    #[error("No target group selected")]
    InvalidState,
}

/// Resolved submission
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    /// The attempt as recorded in history
    pub attempt: ScanAttempt,
    /// The session cannot continue (credential refused)
    pub fatal: bool,
    /// Number of network tries made
    pub tries: u32,
}

impl SubmissionResult {
    pub fn outcome(&self) -> ScanOutcome {
        self.attempt.outcome
    }
}

/// Classified backend answer, before it becomes a `ScanAttempt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: ScanOutcome,
    pub student_name: Option<String>,
    pub message: Option<String>,
    pub fatal: bool,
    pub retryable: bool,
}

impl Classification {
    fn new(outcome: ScanOutcome, message: Option<String>) -> Self {
        Self {
            outcome,
            student_name: None,
            message,
            fatal: false,
            retryable: false,
        }
    }
}

/// Client submitting scans to the attendance backend
pub struct SubmissionClient {
    backend: Arc<dyn AttendanceBackend>,
    history: Arc<ScanHistory>,
    retry_backoff: Duration,
}

impl SubmissionClient {
    /// Create a client that retries immediately
    pub fn new(backend: Arc<dyn AttendanceBackend>, history: Arc<ScanHistory>) -> Self {
        Self {
            backend,
            history,
            retry_backoff: Duration::ZERO,
        }
    }

    /// Wait `retry_backoff` before the single retry
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn history(&self) -> &Arc<ScanHistory> {
        &self.history
    }

    /// Submit a scan captured now, recording the token's canonical text
    pub async fn submit(
        &self,
        token: &IdentityToken,
        target_group_id: Option<&str>,
    ) -> Result<SubmissionResult, SubmissionError> {
        let raw_text = token.raw_text();
        self.submit_captured(token, &raw_text, target_group_id, Utc::now())
            .await
    }

    /// Submit a scan the device read as `raw_text` at `captured_at`
    ///
    /// # Errors
    ///
    /// - `InvalidState` if `target_group_id` is absent or blank; nothing is sent
    pub async fn submit_captured(
        &self,
        token: &IdentityToken,
        raw_text: &str,
        target_group_id: Option<&str>,
        captured_at: DateTime<Utc>,
    ) -> Result<SubmissionResult, SubmissionError> {
        let group_id = target_group_id
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or(SubmissionError::InvalidState)?;

        let request = ScanRequest::present(token.subject_id(), group_id);

        let mut tries = 0;
        let classification = loop {
            tries += 1;
            let classification = classify(self.backend.record_scan(&request).await);
            if classification.retryable && tries < MAX_TRIES {
                tracing::warn!(
                    "Scan for {} failed ({}), retrying",
                    token.subject_id(),
                    classification.message.as_deref().unwrap_or("network error")
                );
                if !self.retry_backoff.is_zero() {
                    tokio::time::sleep(self.retry_backoff).await;
                }
                continue;
            }
            break classification;
        };

        match classification.outcome {
            ScanOutcome::Accepted => tracing::info!(
                "Attendance recorded for {} in group {}",
                token.subject_id(),
                group_id
            ),
            ScanOutcome::DuplicateSuppressed => tracing::info!(
                "Attendance for {} already recorded in group {}",
                token.subject_id(),
                group_id
            ),
            ScanOutcome::Rejected | ScanOutcome::NetworkError => tracing::warn!(
                "Scan for {} {}: {}",
                token.subject_id(),
                classification.outcome,
                classification.message.as_deref().unwrap_or("-")
            ),
        }

        let attempt = ScanAttempt::resolved(
            raw_text,
            token.subject_id(),
            group_id,
            captured_at,
            classification.outcome,
            classification.student_name,
            classification.message,
        );

        if !self.history.record(attempt.clone()) {
            tracing::debug!("Scan history closed, not recording {}", attempt.id);
        }

        Ok(SubmissionResult {
            attempt,
            fatal: classification.fatal,
            tries,
        })
    }
}

/// Classify one backend exchange
pub fn classify(result: Result<BackendReply, TransportError>) -> Classification {
    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            let mut c = Classification::new(ScanOutcome::NetworkError, Some(e.to_string()));
            c.retryable = true;
            return c;
        }
    };

    let status = reply.status;
    let body = reply.body;

    if status >= 500 {
        let message = body
            .message
            .unwrap_or_else(|| format!("Server error ({})", status));
        let mut c = Classification::new(ScanOutcome::NetworkError, Some(message));
        c.retryable = true;
        return c;
    }

    if reply_is_accepted(status, body.success, body.message.as_deref()) {
        let mut c = Classification::new(ScanOutcome::Accepted, body.message);
        c.student_name = body.data.and_then(|d| d.student).and_then(|s| s.name);
        return c;
    }

    if status == 401 || status == 403 {
        let message = body
            .message
            .unwrap_or_else(|| "Not authorized to record attendance".to_string());
        let mut c = Classification::new(ScanOutcome::Rejected, Some(message));
        c.fatal = true;
        return c;
    }

    if is_duplicate(status, body.code.as_deref(), body.message.as_deref()) {
        return Classification::new(ScanOutcome::DuplicateSuppressed, body.message);
    }

    let message = body
        .message
        .unwrap_or_else(|| format!("Scan rejected ({})", status));
    Classification::new(ScanOutcome::Rejected, Some(message))
}

/// 2xx counts as accepted unless the body explicitly reports a failure
fn reply_is_accepted(status: u16, success: bool, message: Option<&str>) -> bool {
    (200..300).contains(&status) && (success || message.is_none())
}

/// Whether the backend is saying this subject was already recorded
pub fn is_duplicate(status: u16, code: Option<&str>, message: Option<&str>) -> bool {
    if let Some(code) = code {
        if DUPLICATE_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
            return true;
        }
    }
    if status == 409 {
        return true;
    }
    match message {
        Some(message) => {
            let message = message.to_lowercase();
            DUPLICATE_MARKERS.iter().any(|m| message.contains(m))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiEnvelope, MyQrCode, ScanData, StudentInfo};
    use crate::services::codec::IdentityCodec;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend replaying a scripted sequence of results
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<BackendReply, TransportError>>>,
        requests: Mutex<Vec<ScanRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<BackendReply, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ScanRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AttendanceBackend for ScriptedBackend {
        async fn record_scan(&self, request: &ScanRequest) -> Result<BackendReply, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".into())))
        }

        async fn fetch_my_qr_code(&self) -> Result<MyQrCode, TransportError> {
            Err(TransportError::InvalidResponse("not scripted".into()))
        }
    }

    fn reply(status: u16, success: bool, message: Option<&str>) -> BackendReply {
        BackendReply {
            status,
            body: ApiEnvelope {
                success,
                data: None,
                message: message.map(String::from),
                code: None,
            },
        }
    }

    fn accepted(name: &str) -> BackendReply {
        BackendReply {
            status: 200,
            body: ApiEnvelope {
                success: true,
                data: Some(ScanData {
                    student: Some(StudentInfo {
                        name: Some(name.to_string()),
                        extra: Default::default(),
                    }),
                }),
                message: None,
                code: None,
            },
        }
    }

    fn token(subject: &str) -> IdentityToken {
        IdentityCodec::with_default_pattern().unwrap().decode(subject).unwrap()
    }

    fn client(backend: Arc<ScriptedBackend>) -> (SubmissionClient, Arc<ScanHistory>) {
        let history = Arc::new(ScanHistory::new(10));
        (SubmissionClient::new(backend, history.clone()), history)
    }

    #[tokio::test]
    async fn test_missing_group_fails_fast_without_network() {
        let backend = ScriptedBackend::new(vec![Ok(accepted("Ada"))]);
        let (client, history) = client(backend.clone());

        assert_eq!(
            client.submit(&token("STU-42"), None).await.unwrap_err(),
            SubmissionError::InvalidState
        );
        assert_eq!(
            client.submit(&token("STU-42"), Some("  ")).await.unwrap_err(),
            SubmissionError::InvalidState
        );
        assert!(backend.requests().is_empty());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_accepted_carries_student_name() {
        let backend = ScriptedBackend::new(vec![Ok(accepted("Ada Lovelace"))]);
        let (client, history) = client(backend.clone());

        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();

        assert_eq!(result.outcome(), ScanOutcome::Accepted);
        assert_eq!(result.attempt.student_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(result.tries, 1);
        assert_eq!(backend.requests(), vec![ScanRequest::present("STU-42", "G1")]);
        assert_eq!(history.latest().unwrap().id, result.attempt.id);
    }

    #[tokio::test]
    async fn test_attempt_keeps_text_as_read() {
        let backend = ScriptedBackend::new(vec![Ok(accepted("Ada"))]);
        let (client, _) = client(backend.clone());
        let raw = "  STU-42\r\n";
        let captured_at = Utc::now();

        let result = client
            .submit_captured(&token(raw), raw, Some("G1"), captured_at)
            .await
            .unwrap();

        assert_eq!(result.attempt.raw_text, raw);
        assert_eq!(result.attempt.subject_id, "STU-42");
        assert_eq!(result.attempt.captured_at, captured_at);
        assert_eq!(backend.requests(), vec![ScanRequest::present("STU-42", "G1")]);
    }

    #[tokio::test]
    async fn test_duplicate_message_is_not_rejection() {
        let backend = ScriptedBackend::new(vec![Ok(reply(
            400,
            false,
            Some("Attendance already recorded for this session"),
        ))]);
        let (client, _) = client(backend);

        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();
        assert_eq!(result.outcome(), ScanOutcome::DuplicateSuppressed);
        assert!(!result.fatal);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let backend = ScriptedBackend::new(vec![
            Ok(reply(400, false, Some("Student is not in this group"))),
            Ok(accepted("Ada")),
        ]);
        let (client, _) = client(backend.clone());

        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();
        assert_eq!(result.outcome(), ScanOutcome::Rejected);
        assert_eq!(result.attempt.message.as_deref(), Some("Student is not in this group"));
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_retried_once_then_surfaced() {
        let backend = ScriptedBackend::new(vec![
            Err(TransportError::Connect("connection refused".into())),
            Err(TransportError::Connect("connection refused".into())),
            Ok(accepted("Ada")),
        ]);
        let (client, history) = client(backend.clone());

        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();
        assert_eq!(result.outcome(), ScanOutcome::NetworkError);
        assert_eq!(result.tries, 2);
        assert_eq!(backend.requests().len(), 2);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let backend = ScriptedBackend::new(vec![
            Err(TransportError::Timeout),
            Ok(accepted("Ada")),
        ]);
        let (client, _) = client(backend);

        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();
        assert_eq!(result.outcome(), ScanOutcome::Accepted);
        assert_eq!(result.tries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let backend = ScriptedBackend::new(vec![
            Ok(reply(503, false, None)),
            Ok(accepted("Ada")),
        ]);
        let history = Arc::new(ScanHistory::new(10));
        let client = SubmissionClient::new(backend, history)
            .with_retry_backoff(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();
        assert_eq!(result.outcome(), ScanOutcome::Accepted);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let backend = ScriptedBackend::new(vec![Ok(reply(401, false, Some("Token expired")))]);
        let (client, _) = client(backend);

        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();
        assert_eq!(result.outcome(), ScanOutcome::Rejected);
        assert!(result.fatal);
    }

    #[tokio::test]
    async fn test_closed_history_drops_record_but_returns_result() {
        let backend = ScriptedBackend::new(vec![Ok(accepted("Ada"))]);
        let (client, history) = client(backend);
        history.close();

        let result = client.submit(&token("STU-42"), Some("G1")).await.unwrap();
        assert_eq!(result.outcome(), ScanOutcome::Accepted);
        assert!(history.is_empty());
    }

    #[test]
    fn test_classify_duplicate_variants() {
        let by_code = BackendReply {
            status: 400,
            body: ApiEnvelope {
                success: false,
                data: None,
                message: Some("Nope".into()),
                code: Some("duplicate_attendance".into()),
            },
        };
        assert_eq!(classify(Ok(by_code)).outcome, ScanOutcome::DuplicateSuppressed);
        assert_eq!(
            classify(Ok(reply(409, false, None))).outcome,
            ScanOutcome::DuplicateSuppressed
        );
        assert_eq!(
            classify(Ok(reply(400, false, Some("DUPLICATE scan")))).outcome,
            ScanOutcome::DuplicateSuppressed
        );
        assert_eq!(
            classify(Ok(reply(400, false, Some("Invalid student")))).outcome,
            ScanOutcome::Rejected
        );
    }

    #[test]
    fn test_classify_success_false_on_2xx_uses_message() {
        let c = classify(Ok(reply(200, false, Some("Already marked present"))));
        assert_eq!(c.outcome, ScanOutcome::DuplicateSuppressed);

        let c = classify(Ok(reply(200, false, None)));
        assert_eq!(c.outcome, ScanOutcome::Accepted);
    }

    #[test]
    fn test_classify_server_error_is_retryable_network_error() {
        let c = classify(Ok(reply(502, false, None)));
        assert_eq!(c.outcome, ScanOutcome::NetworkError);
        assert!(c.retryable);
        assert_eq!(c.message.as_deref(), Some("Server error (502)"));
    }
}
