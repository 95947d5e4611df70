//! Scanner - camera ownership and the scan session lifecycle
//!
//! - `camera`: devices yielding decoded QR text, with exclusive leases
//! - `state`: the session state machine
//! - `session`: the task tying a camera, the codec and submissions together

pub mod camera;
pub mod session;
pub mod state;


pub use camera::{
    Camera, CameraError, CameraFeed, CameraLease, ChannelCamera, DecodedFrame, DeviceLock,
    FrameSender, LineCamera,
};
pub use session::{OperatorNotice, ScanError, ScanSession};
pub use state::{DropReason, InvalidTransition, ScanState, ScanStateMachine};
