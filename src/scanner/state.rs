//! Scan session state machine
//!
//! Pure transition logic, no I/O. The session driver owns one machine and
//! applies every event to it under a lock, so moving into `Submitting` is a
//! single check-and-set: a decode either wins the transition or is dropped.
//!
//! ```text
//! Idle --start--> CameraStarting --ready--> CameraActive
//! CameraStarting --failed--> CameraError --start--> CameraStarting
//! CameraActive --decode--> Submitting --finished--> Cooldown --elapsed--> CameraActive
//! Submitting --fatal--> CameraError
//! any --stop--> Closed
//! ```

use std::time::Duration;
use tokio::time::Instant;

use crate::models::ScanStatus;

/// Full session state, with the data each state carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    CameraStarting,
    CameraActive,
    /// One submission is in flight
    Submitting { subject_id: String, group_id: String },
    /// Decodes are ignored until `until`
    Cooldown { until: Instant },
    CameraError { reason: String },
    Closed,
}

impl ScanState {
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanState::Idle => ScanStatus::Idle,
            ScanState::CameraStarting => ScanStatus::CameraStarting,
            ScanState::CameraActive => ScanStatus::CameraActive,
            ScanState::Submitting { .. } => ScanStatus::Submitting,
            ScanState::Cooldown { .. } => ScanStatus::Cooldown,
            ScanState::CameraError { .. } => ScanStatus::CameraError,
            ScanState::Closed => ScanStatus::Closed,
        }
    }
}

/// Lifecycle call made from a state that does not allow it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot {action} while {from}")]
pub struct InvalidTransition {
    pub from: ScanStatus,
    pub action: &'static str,
}

/// Why a decode did not start a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A submission is already in flight
    Submitting,
    /// Still inside the post-submission cooldown
    CoolingDown,
    /// The camera is not live
    Inactive(ScanStatus),
}

#[derive(Debug)]
pub struct ScanStateMachine {
    state: ScanState,
    cooldown: Duration,
}

impl ScanStateMachine {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: ScanState::Idle,
            cooldown,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn status(&self) -> ScanStatus {
        self.state.status()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// End of the current cooldown, if cooling down
    pub fn cooldown_deadline(&self) -> Option<Instant> {
        match self.state {
            ScanState::Cooldown { until } => Some(until),
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.status(),
            action,
        }
    }

    /// Operator asked for the camera
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            ScanState::Idle | ScanState::CameraError { .. } => {
                self.state = ScanState::CameraStarting;
                Ok(())
            }
            _ => Err(self.invalid("start")),
        }
    }

    /// Device came up
    pub fn camera_ready(&mut self) -> Result<(), InvalidTransition> {
        match self.state {
            ScanState::CameraStarting => {
                self.state = ScanState::CameraActive;
                Ok(())
            }
            _ => Err(self.invalid("activate camera")),
        }
    }

    /// Device failed to start or was lost
    pub fn camera_failed(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        match self.state {
            ScanState::Idle | ScanState::Closed | ScanState::CameraError { .. } => {
                Err(self.invalid("fail camera"))
            }
            _ => {
                self.state = ScanState::CameraError {
                    reason: reason.into(),
                };
                Ok(())
            }
        }
    }

    /// Leave an expired cooldown. Returns `true` if the state changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            ScanState::Cooldown { until } if now >= until => {
                self.state = ScanState::CameraActive;
                true
            }
            _ => false,
        }
    }

    /// Whether a decode at `now` would be taken up
    pub fn accepts_decode(&self, now: Instant) -> bool {
        match self.state {
            ScanState::CameraActive => true,
            ScanState::Cooldown { until } => now >= until,
            _ => false,
        }
    }

    /// Claim the single submission slot for a decoded subject
    pub fn begin_submission(
        &mut self,
        subject_id: &str,
        group_id: &str,
        now: Instant,
    ) -> Result<(), DropReason> {
        self.poll(now);
        match self.state {
            ScanState::CameraActive => {
                self.state = ScanState::Submitting {
                    subject_id: subject_id.to_string(),
                    group_id: group_id.to_string(),
                };
                Ok(())
            }
            ScanState::Submitting { .. } => Err(DropReason::Submitting),
            ScanState::Cooldown { .. } => Err(DropReason::CoolingDown),
            _ => Err(DropReason::Inactive(self.status())),
        }
    }

    /// The in-flight submission resolved.
    ///
    /// A fatal result halts scanning; anything else cools down before the
    /// camera takes new decodes.
    pub fn finish_submission(
        &mut self,
        fatal: Option<String>,
        now: Instant,
    ) -> Result<(), InvalidTransition> {
        match self.state {
            ScanState::Submitting { .. } => {
                self.state = match fatal {
                    Some(reason) => ScanState::CameraError { reason },
                    None => ScanState::Cooldown {
                        until: now + self.cooldown,
                    },
                };
                Ok(())
            }
            _ => Err(self.invalid("finish submission")),
        }
    }

    /// Pause decodes for one cooldown without submitting.
    ///
    /// Used when a code was read but cannot be submitted, so the operator is
    /// told once per presentation. Returns `true` if the state changed.
    pub fn hold(&mut self, now: Instant) -> bool {
        match self.state {
            ScanState::CameraActive => {
                self.state = ScanState::Cooldown {
                    until: now + self.cooldown,
                };
                true
            }
            _ => false,
        }
    }

    /// Close the session. Returns `false` if it was already closed.
    pub fn stop(&mut self) -> bool {
        let was_open = self.state != ScanState::Closed;
        self.state = ScanState::Closed;
        was_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(1500);

    fn active() -> ScanStateMachine {
        let mut machine = ScanStateMachine::new(COOLDOWN);
        machine.start().unwrap();
        machine.camera_ready().unwrap();
        machine
    }

    #[test]
    fn test_start_path() {
        let mut machine = ScanStateMachine::new(COOLDOWN);
        assert_eq!(machine.status(), ScanStatus::Idle);
        machine.start().unwrap();
        assert_eq!(machine.status(), ScanStatus::CameraStarting);
        machine.camera_ready().unwrap();
        assert_eq!(machine.status(), ScanStatus::CameraActive);
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let mut machine = active();
        let err = machine.start().unwrap_err();
        assert_eq!(err.from, ScanStatus::CameraActive);
    }

    #[test]
    fn test_camera_error_can_be_retried() {
        let mut machine = ScanStateMachine::new(COOLDOWN);
        machine.start().unwrap();
        machine.camera_failed("permission denied").unwrap();
        assert_eq!(
            machine.state(),
            &ScanState::CameraError {
                reason: "permission denied".into()
            }
        );
        machine.start().unwrap();
        assert_eq!(machine.status(), ScanStatus::CameraStarting);
    }

    #[test]
    fn test_only_one_submission_at_a_time() {
        let mut machine = active();
        let now = Instant::now();

        machine.begin_submission("STU-1", "G1", now).unwrap();
        assert_eq!(
            machine.begin_submission("STU-2", "G1", now),
            Err(DropReason::Submitting)
        );
        assert_eq!(
            machine.state(),
            &ScanState::Submitting {
                subject_id: "STU-1".into(),
                group_id: "G1".into()
            }
        );
    }

    #[test]
    fn test_cooldown_drops_then_reopens() {
        let mut machine = active();
        let t0 = Instant::now();

        machine.begin_submission("STU-1", "G1", t0).unwrap();
        machine.finish_submission(None, t0).unwrap();
        assert_eq!(machine.cooldown_deadline(), Some(t0 + COOLDOWN));

        let early = t0 + Duration::from_millis(500);
        assert!(!machine.accepts_decode(early));
        assert_eq!(
            machine.begin_submission("STU-1", "G1", early),
            Err(DropReason::CoolingDown)
        );

        let late = t0 + COOLDOWN;
        assert!(machine.accepts_decode(late));
        machine.begin_submission("STU-1", "G1", late).unwrap();
        assert_eq!(machine.status(), ScanStatus::Submitting);
    }

    #[test]
    fn test_poll_leaves_expired_cooldown() {
        let mut machine = active();
        let t0 = Instant::now();
        machine.begin_submission("STU-1", "G1", t0).unwrap();
        machine.finish_submission(None, t0).unwrap();

        assert!(!machine.poll(t0 + Duration::from_millis(10)));
        assert!(machine.poll(t0 + COOLDOWN));
        assert_eq!(machine.status(), ScanStatus::CameraActive);
    }

    #[test]
    fn test_fatal_result_halts_scanning() {
        let mut machine = active();
        let now = Instant::now();
        machine.begin_submission("STU-1", "G1", now).unwrap();
        machine
            .finish_submission(Some("Token expired".into()), now)
            .unwrap();
        assert_eq!(machine.status(), ScanStatus::CameraError);
        assert!(!machine.accepts_decode(now));
    }

    #[test]
    fn test_decode_before_camera_ready_is_dropped() {
        let mut machine = ScanStateMachine::new(COOLDOWN);
        assert_eq!(
            machine.begin_submission("STU-1", "G1", Instant::now()),
            Err(DropReason::Inactive(ScanStatus::Idle))
        );
    }

    #[test]
    fn test_hold_pauses_decodes_for_one_cooldown() {
        let mut machine = active();
        let t0 = Instant::now();

        assert!(machine.hold(t0));
        assert_eq!(machine.cooldown_deadline(), Some(t0 + COOLDOWN));
        assert!(!machine.accepts_decode(t0 + Duration::from_millis(100)));
        assert!(!machine.hold(t0));

        assert!(machine.poll(t0 + COOLDOWN));
        assert_eq!(machine.status(), ScanStatus::CameraActive);
    }

    #[test]
    fn test_hold_only_from_camera_active() {
        let mut machine = ScanStateMachine::new(COOLDOWN);
        assert!(!machine.hold(Instant::now()));
        assert_eq!(machine.status(), ScanStatus::Idle);

        let mut machine = active();
        machine.begin_submission("STU-1", "G1", Instant::now()).unwrap();
        assert!(!machine.hold(Instant::now()));
        assert_eq!(machine.status(), ScanStatus::Submitting);
    }

    #[test]
    fn test_stop_is_terminal() {
        let mut machine = active();
        let now = Instant::now();
        machine.begin_submission("STU-1", "G1", now).unwrap();

        assert!(machine.stop());
        assert!(!machine.stop());
        assert_eq!(machine.status(), ScanStatus::Closed);
        assert!(machine.start().is_err());
        assert!(machine.finish_submission(None, now).is_err());
        assert!(machine.camera_failed("late").is_err());
        assert_eq!(
            machine.begin_submission("STU-1", "G1", now),
            Err(DropReason::Inactive(ScanStatus::Closed))
        );
    }
}
