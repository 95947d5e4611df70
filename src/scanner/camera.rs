//! Camera devices
//!
//! A camera is anything that yields decoded QR text. Each device is guarded
//! by a [`DeviceLock`]; opening it takes the single lease, and the returned
//! [`CameraFeed`] holds that lease until it is dropped. Dropping the feed also
//! cancels the task pumping frames into it, so releasing the camera is tied to
//! scope rather than to explicit cleanup calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{self, BufRead, BufReader};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Frames buffered between the decoder and the session
const FRAME_BUFFER: usize = 16;

/// Error types for camera acquisition and operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    /// The OS or user refused access to the device
    #[error("Camera permission denied")]
    PermissionDenied,

    /// The device could not be opened
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    /// Another session holds the device
    #[error("Camera is in use by another session")]
    Busy,

    /// The device did not come up in time
    #[error("Camera did not start within {0:?}")]
    StartTimeout(Duration),

    /// The device stopped producing frames
    #[error("Camera feed ended")]
    FeedEnded,

    /// The backend refused the operator's credential
    #[error("Scanning halted: {0}")]
    Halted(String),
}

impl From<io::Error> for CameraError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => CameraError::PermissionDenied,
            _ => CameraError::Unavailable(e.to_string()),
        }
    }
}

/// One decode result from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub raw_text: String,
    pub captured_at: DateTime<Utc>,
}

impl DecodedFrame {
    pub fn now(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            captured_at: Utc::now(),
        }
    }
}

/// Exclusive ownership of one physical device
#[derive(Debug, Clone)]
pub struct DeviceLock {
    permits: Arc<Semaphore>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the device, failing immediately if it is already held
    pub fn try_lease(&self) -> Result<CameraLease, CameraError> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map(|permit| CameraLease { _permit: permit })
            .map_err(|_| CameraError::Busy)
    }

    pub fn is_leased(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Held while a session owns the device; released on drop
#[derive(Debug)]
pub struct CameraLease {
    _permit: OwnedSemaphorePermit,
}

/// Live frame stream from an opened camera
#[derive(Debug)]
pub struct CameraFeed {
    frames: mpsc::Receiver<DecodedFrame>,
    cancel: CancellationToken,
    _lease: CameraLease,
}

impl CameraFeed {
    pub fn new(
        frames: mpsc::Receiver<DecodedFrame>,
        cancel: CancellationToken,
        lease: CameraLease,
    ) -> Self {
        Self {
            frames,
            cancel,
            _lease: lease,
        }
    }

    /// Next decoded frame; `None` once the device stops
    pub async fn next_frame(&mut self) -> Option<DecodedFrame> {
        self.frames.recv().await
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A source of decoded QR frames
#[async_trait]
pub trait Camera: Send + Sync {
    /// Acquire the device. The feed owns it until dropped.
    async fn open(&self) -> Result<CameraFeed, CameraError>;
}

type ReaderFactory = dyn Fn() -> io::Result<Box<dyn BufRead + Send>> + Send + Sync;

/// Line-oriented decoder device.
///
/// Hardware QR scanners in keyboard mode type the decoded text followed by
/// Enter; each non-empty line is one frame.
///
/// Lines are read on a dedicated OS thread rather than tokio's blocking pool.
/// A read parked on an idle device cannot be interrupted, and a pool thread
/// stuck there would hold up runtime shutdown. The reader thread exits at the
/// next line once its feed is dropped, and never delays process exit.
pub struct LineCamera {
    lock: DeviceLock,
    open_reader: Box<ReaderFactory>,
}

impl LineCamera {
    pub fn new<F>(open_reader: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn BufRead + Send>> + Send + Sync + 'static,
    {
        Self {
            lock: DeviceLock::new(),
            open_reader: Box::new(open_reader),
        }
    }

    /// Decoder attached to this process's standard input
    pub fn stdin() -> Self {
        Self::new(|| Ok(Box::new(BufReader::new(io::stdin())) as Box<dyn BufRead + Send>))
    }

    pub fn is_in_use(&self) -> bool {
        self.lock.is_leased()
    }
}

/// Forward lines from `reader` until EOF, a read error, or the feed goes away
fn pump_lines(reader: Box<dyn BufRead + Send>, tx: mpsc::Sender<DecodedFrame>, cancel: CancellationToken) {
    for line in reader.lines() {
        if cancel.is_cancelled() {
            break;
        }
        match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => {
                // a full buffer means the session is busy; the frame is stale anyway
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    tx.try_send(DecodedFrame::now(line))
                {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Decoder read failed: {}", e);
                break;
            }
        }
    }
    tracing::debug!("Decoder reader stopped");
}

#[async_trait]
impl Camera for LineCamera {
    async fn open(&self) -> Result<CameraFeed, CameraError> {
        let lease = self.lock.try_lease()?;
        let reader = (self.open_reader)()?;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        std::thread::Builder::new()
            .name("line-decoder".into())
            .spawn(move || pump_lines(reader, tx, token))?;

        Ok(CameraFeed::new(rx, cancel, lease))
    }
}

/// Camera fed by another component, e.g. a decoder library's frame callback.
///
/// Frames pushed through the paired [`FrameSender`] reach whichever feed is
/// currently open; with no open feed they are discarded.
pub struct ChannelCamera {
    lock: DeviceLock,
    slot: Arc<Mutex<Option<mpsc::Sender<DecodedFrame>>>>,
    start_delay: Duration,
    next_failure: Mutex<Option<CameraError>>,
}

/// Producer side of a [`ChannelCamera`]
#[derive(Clone)]
pub struct FrameSender {
    slot: Arc<Mutex<Option<mpsc::Sender<DecodedFrame>>>>,
}

impl ChannelCamera {
    pub fn new() -> (Self, FrameSender) {
        let slot = Arc::new(Mutex::new(None));
        let camera = Self {
            lock: DeviceLock::new(),
            slot: slot.clone(),
            start_delay: Duration::ZERO,
            next_failure: Mutex::new(None),
        };
        (camera, FrameSender { slot })
    }

    /// Simulate a device that takes `delay` to come up
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Make the next `open` fail with `error`
    pub fn fail_next_open(&self, error: CameraError) {
        *self.next_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    pub fn is_in_use(&self) -> bool {
        self.lock.is_leased()
    }
}

#[async_trait]
impl Camera for ChannelCamera {
    async fn open(&self) -> Result<CameraFeed, CameraError> {
        let lease = self.lock.try_lease()?;
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if let Some(error) = self.next_failure.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(CameraFeed::new(rx, CancellationToken::new(), lease))
    }
}

impl FrameSender {
    /// Push decoded text; returns `false` if no feed took it
    pub fn push(&self, raw_text: impl Into<String>) -> bool {
        self.push_frame(DecodedFrame::now(raw_text))
    }

    pub fn push_frame(&self, frame: DecodedFrame) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// End the current feed, as if the device was unplugged
    pub fn disconnect(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
