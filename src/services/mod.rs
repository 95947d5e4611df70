//! Services layer - Check-in logic
//!
//! This module contains the components the scan session is built from.
//! Services are responsible for:
//! - Encoding and decoding QR identity payloads
//! - Submitting scans and classifying the backend's answer
//! - Rendering a student's QR code
//! - Keeping recent scan outcomes for the operator

pub mod codec;
pub mod history;
pub mod render;
pub mod submission;

pub use codec::{DecodeError, IdentityCodec};
pub use history::{ScanHistory, DEFAULT_HISTORY_CAPACITY};
pub use render::{decode_data_uri, render_png, render_svg, QrRenderService, RenderError};
pub use submission::{
    classify, is_duplicate, Classification, SubmissionClient, SubmissionError, SubmissionResult,
};
