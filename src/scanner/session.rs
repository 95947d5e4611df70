//! Scan session driver
//!
//! A `ScanSession` owns one camera lease and one [`ScanStateMachine`]. Once
//! started, a single task drains the camera feed one frame at a time; frames
//! that arrive while a submission is in flight or during cooldown are dropped
//! on the spot rather than queued.
//!
//! `stop()` cancels the drain task, which drops the feed and so releases the
//! camera before `stop()` returns. A submission already in flight is left to
//! finish in the background; its result is discarded because the history is
//! closed at the same time.
//!
//! Notices go out before the status change they accompany, so a subscriber
//! that sees a terminal status can drain every notice leading up to it.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::camera::{Camera, CameraError, CameraFeed, DecodedFrame};
use super::state::{InvalidTransition, ScanState, ScanStateMachine};
use crate::config::ScannerConfig;
use crate::models::{ScanAttempt, ScanStatus, SessionContext};
use crate::services::{IdentityCodec, SubmissionClient, SubmissionError, SubmissionResult};

/// Notices buffered for slow subscribers
const NOTICE_BUFFER: usize = 64;

type Submission = JoinHandle<Result<SubmissionResult, SubmissionError>>;

/// Error types for session lifecycle calls
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// The session was stopped while the call was in progress
    #[error("Session is closed")]
    Closed,
}

/// Feedback for the operator
#[derive(Debug, Clone)]
pub enum OperatorNotice {
    /// A scan resolved
    Outcome(ScanAttempt),
    /// A code was read but no target group is selected
    MissingTargetGroup { raw_text: String },
    /// The camera stopped; scanning needs an explicit restart
    CameraFailed(CameraError),
}

struct Shared {
    machine: Mutex<ScanStateMachine>,
    status: watch::Sender<ScanStatus>,
    notices: broadcast::Sender<OperatorNotice>,
    target_group: watch::Sender<Option<String>>,
    camera: Arc<dyn Camera>,
    codec: Arc<IdentityCodec>,
    submitter: Arc<SubmissionClient>,
    camera_start_timeout: Duration,
}

/// One operator's scanning session
pub struct ScanSession {
    shared: Arc<Shared>,
    driver: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl ScanSession {
    pub fn new(
        camera: Arc<dyn Camera>,
        codec: Arc<IdentityCodec>,
        submitter: Arc<SubmissionClient>,
        config: &ScannerConfig,
    ) -> Self {
        let (status, _) = watch::channel(ScanStatus::Idle);
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        let (target_group, _) = watch::channel(normalize_group(config.target_group.clone()));

        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(ScanStateMachine::new(config.cooldown())),
                status,
                notices,
                target_group,
                camera,
                codec,
                submitter,
                camera_start_timeout: config.camera_start_timeout(),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Acquire the camera and begin draining decoded frames
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` unless the session is idle or in camera error
    /// - `Camera` if the device is busy, refused, or does not start in time;
    ///   the session is then in `CameraError`
    /// - `Closed` if `stop()` ran while the camera was starting
    pub async fn start(&self) -> Result<(), ScanError> {
        self.shared.transition(|m| m.start())?;
        tracing::info!("Starting camera");

        // a halted driver may still be dropping its feed
        let previous = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((handle, _)) = previous {
            if let Err(e) = handle.await {
                tracing::error!("Scan driver task failed: {}", e);
            }
        }

        let opened = tokio::time::timeout(self.shared.camera_start_timeout, self.shared.camera.open()).await;
        let feed = match opened {
            Ok(Ok(feed)) => feed,
            Ok(Err(e)) => return Err(self.shared.fail_camera(e).into()),
            Err(_) => {
                let e = CameraError::StartTimeout(self.shared.camera_start_timeout);
                return Err(self.shared.fail_camera(e).into());
            }
        };

        if self.shared.transition(|m| m.camera_ready()).is_err() {
            // stopped while starting; `feed` drops here and releases the device
            return Err(ScanError::Closed);
        }
        tracing::info!("Camera active");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(self.shared.clone(), feed, cancel.clone()));
        *self.driver.lock().unwrap_or_else(|e| e.into_inner()) = Some((handle, cancel));
        Ok(())
    }

    /// Close the session and release the camera.
    ///
    /// Idempotent. The session cannot be restarted afterwards.
    pub async fn stop(&self) {
        let was_open = self.shared.transition(|m| Ok::<_, ()>(m.stop())).unwrap_or(false);
        self.shared.submitter.history().close();

        let driver = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((handle, cancel)) = driver {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!("Scan driver task failed: {}", e);
            }
        }

        if was_open {
            tracing::info!("Scan session closed");
        }
    }

    /// Select the group new scans are recorded against
    pub fn set_target_group(&self, group_id: Option<String>) {
        self.shared.target_group.send_replace(normalize_group(group_id));
    }

    pub fn target_group(&self) -> Option<String> {
        self.shared.target_group.borrow().clone()
    }

    pub fn status(&self) -> ScanStatus {
        *self.shared.status.borrow()
    }

    /// Current state including its data
    pub fn state(&self) -> ScanState {
        self.shared.lock_machine().state().clone()
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            target_group_id: self.target_group(),
            camera_state: self.status(),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<OperatorNotice> {
        self.shared.notices.subscribe()
    }

    /// Recent outcomes, newest first
    pub fn history(&self) -> Vec<ScanAttempt> {
        self.shared.submitter.history().snapshot()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.shared.lock_machine().stop();
        self.shared.submitter.history().close();
        if let Some((_, cancel)) = self.driver.lock().unwrap_or_else(|e| e.into_inner()).take() {
            cancel.cancel();
        }
    }
}

impl Shared {
    fn lock_machine(&self) -> std::sync::MutexGuard<'_, ScanStateMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to the machine and publish the resulting status
    fn transition<T, E>(
        &self,
        f: impl FnOnce(&mut ScanStateMachine) -> Result<T, E>,
    ) -> Result<T, E> {
        let result = self.apply(f);
        self.publish();
        result
    }

    /// Apply `f` to the machine without publishing; pair with `publish()`
    fn apply<T, E>(&self, f: impl FnOnce(&mut ScanStateMachine) -> Result<T, E>) -> Result<T, E> {
        f(&mut self.lock_machine())
    }

    /// Publish the machine's current status to watchers
    fn publish(&self) {
        let status = self.lock_machine().status();
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn notify(&self, notice: OperatorNotice) {
        // no subscribers is fine
        let _ = self.notices.send(notice);
    }

    /// Move the machine to `CameraError` without publishing.
    ///
    /// Returns the error to announce, if the move happened.
    fn halt(&self, error: CameraError) -> Option<CameraError> {
        tracing::error!("Camera failed: {}", error);
        self.apply(|m| m.camera_failed(error.to_string()))
            .ok()
            .map(|_| error)
    }

    /// Announce a halt, then publish the status it left behind
    fn announce_halt(&self, halted: Option<CameraError>) {
        if let Some(error) = halted {
            self.notify(OperatorNotice::CameraFailed(error));
        }
        self.publish();
    }

    fn fail_camera(&self, error: CameraError) -> CameraError {
        let halted = self.halt(error.clone());
        self.announce_halt(halted);
        error
    }

    /// Handle one decoded frame; returns the spawned submission if it won the slot
    fn on_frame(&self, frame: DecodedFrame) -> Option<Submission> {
        let now = Instant::now();
        if !self.transition(|m| {
            m.poll(now);
            Ok::<_, ()>(m.accepts_decode(now))
        })
        .unwrap_or(false)
        {
            tracing::debug!("Dropping frame while {}", *self.status.borrow());
            return None;
        }

        let token = match self.codec.decode(&frame.raw_text) {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!("Ignoring undecodable frame: {}", e);
                return None;
            }
        };

        let target_group = self.target_group.borrow().clone();
        let group_id = match target_group {
            Some(group_id) => group_id,
            None => {
                tracing::warn!("Scanned {} with no target group selected", token.subject_id());
                self.notify(OperatorNotice::MissingTargetGroup {
                    raw_text: frame.raw_text,
                });
                // one notice per presentation, not per frame
                self.transition(|m| Ok::<_, ()>(m.hold(now))).ok();
                return None;
            }
        };

        if let Err(reason) = self.transition(|m| m.begin_submission(token.subject_id(), &group_id, now)) {
            tracing::debug!("Dropping decode of {}: {:?}", token.subject_id(), reason);
            return None;
        }

        tracing::debug!("Submitting {} for group {}", token.subject_id(), group_id);
        let submitter = self.submitter.clone();
        Some(tokio::spawn(async move {
            submitter
                .submit_captured(&token, &frame.raw_text, Some(&group_id), frame.captured_at)
                .await
        }))
    }

    /// Apply a resolved submission.
    ///
    /// Breaks when scanning must halt, carrying the error to announce once
    /// the camera is released. A halt leaves the new status unpublished until
    /// then.
    fn on_submission_finished(
        &self,
        joined: Result<Result<SubmissionResult, SubmissionError>, JoinError>,
    ) -> ControlFlow<Option<CameraError>> {
        let now = Instant::now();
        let (attempt, fatal) = match joined {
            Ok(Ok(result)) => {
                let fatal = result.fatal.then(|| {
                    result
                        .attempt
                        .message
                        .clone()
                        .unwrap_or_else(|| "credential rejected".to_string())
                });
                (Some(result.attempt), fatal)
            }
            Ok(Err(SubmissionError::InvalidState)) => {
                tracing::warn!("Submission started without a target group");
                (None, None)
            }
            Err(e) => {
                tracing::error!("Submission task failed: {}", e);
                (None, None)
            }
        };

        let halted = fatal.clone();
        if let Err(e) = self.apply(|m| m.finish_submission(fatal, now)) {
            tracing::debug!("Submission finished after session moved on: {}", e);
            return ControlFlow::Break(None);
        }
        if let Some(attempt) = attempt {
            self.notify(OperatorNotice::Outcome(attempt));
        }

        match halted {
            Some(reason) => {
                let error = CameraError::Halted(reason);
                tracing::error!("{}", error);
                ControlFlow::Break(Some(error))
            }
            None => {
                self.publish();
                ControlFlow::Continue(())
            }
        }
    }
}

/// Drain the camera feed until cancelled, halted, or the device goes away
async fn drive(shared: Arc<Shared>, mut feed: CameraFeed, cancel: CancellationToken) {
    let mut in_flight: Option<Submission> = None;
    let mut halted = None;

    loop {
        let deadline = shared.lock_machine().cooldown_deadline();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            joined = async {
                match in_flight.as_mut() {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            }, if in_flight.is_some() => {
                in_flight = None;
                if let ControlFlow::Break(error) = shared.on_submission_finished(joined) {
                    halted = error;
                    break;
                }
            }

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let now = Instant::now();
                let _ = shared.transition(|m| Ok::<_, ()>(m.poll(now)));
            }

            frame = feed.next_frame() => match frame {
                Some(frame) => {
                    if let Some(handle) = shared.on_frame(frame) {
                        in_flight = Some(handle);
                    }
                }
                None => {
                    // the last scan before the feed ended still resolves
                    if let Some(handle) = in_flight.take() {
                        let joined = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            joined = handle => joined,
                        };
                        if let ControlFlow::Break(error) = shared.on_submission_finished(joined) {
                            halted = error;
                            break;
                        }
                    }
                    halted = shared.halt(CameraError::FeedEnded);
                    break;
                }
            },
        }
    }

    drop(feed);
    tracing::debug!("Scan driver stopped");

    shared.announce_halt(halted);
}

fn normalize_group(group_id: Option<String>) -> Option<String> {
    group_id
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
}
