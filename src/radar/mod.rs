//! Radar Layer
//!
//! Plate capture workflow: local recognition or phone hand-off through an
//! OCR session that is polled until the backend recognizes a plate.

pub mod handoff;
pub mod poller;
pub mod scanner;

use thiserror::Error;

use crate::api::ApiError;

pub use handoff::{render_qr, MobileUploader};
pub use poller::PollOutcome;
pub use scanner::{Handoff, RadarScanner};

/// Errors surfaced by the capture workflow
#[derive(Debug, Error)]
pub enum ScanError {
    /// A phone session is still being polled
    #[error("a capture session is already active ({0})")]
    SessionActive(String),
    /// Local recognition produced text too short to be a plate
    #[error("Plate not recognized. Try again.")]
    NotRecognized { raw: String },
    /// The recognizer itself failed
    #[error("Recognition error. Try again. ({0})")]
    Recognition(String),
    /// The hand-off origin can't be turned into a URL
    #[error("invalid hand-off origin: {0}")]
    InvalidOrigin(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}
