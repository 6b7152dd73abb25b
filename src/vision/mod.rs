//! Vision Layer
//!
//! Image normalization before upload and local plate recognition.

pub mod normalize;
pub mod plate;

pub use normalize::{normalize_image, DEFAULT_JPEG_QUALITY};
pub use plate::{accept_plate, PlateRecognizer, TesseractCli};
