//! Image normalization before upload
//!
//! Phone cameras hand over HEIC, WEBP, PNG... The OCR backend is only
//! reliable with JPEG, so every capture is re-encoded to a single format.
//! When re-encoding fails the original bytes are forwarded untouched.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Default JPEG quality factor for uploads
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// File name used when the capture surface gives none
const FALLBACK_STEM: &str = "captura";

/// An image ready to be sent to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    /// File name reported in the multipart field
    pub file_name: String,
    /// MIME type of `bytes`
    pub mime: String,
    /// False when re-encoding failed and `bytes` is the original input
    pub reencoded: bool,
}

impl NormalizedImage {
    /// Wrap bytes as-is, guessing the MIME type from the file name
    pub fn passthrough(bytes: Vec<u8>, file_name: Option<&str>) -> Self {
        let file_name = file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(FALLBACK_STEM)
            .to_string();
        let mime = guess_mime(&file_name).to_string();
        Self {
            bytes,
            file_name,
            mime,
            reencoded: false,
        }
    }
}

/// Re-encode `bytes` as JPEG at `quality`, falling back to the original on failure
pub fn normalize_image(bytes: Vec<u8>, file_name: Option<&str>, quality: u8) -> NormalizedImage {
    match encode_jpeg(&bytes, quality) {
        Ok(jpeg) => {
            debug!(
                "Normalized image: {} bytes -> {} bytes JPEG (q={})",
                bytes.len(),
                jpeg.len(),
                quality
            );
            NormalizedImage {
                bytes: jpeg,
                file_name: jpeg_file_name(file_name),
                mime: "image/jpeg".to_string(),
                reencoded: true,
            }
        }
        Err(e) => {
            warn!("Image normalization failed, sending original: {:#}", e);
            NormalizedImage::passthrough(bytes, file_name)
        }
    }
}

fn encode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("Failed to decode image")?;
    // JPEG has no alpha channel
    let rgb = decoded.to_rgb8();

    let mut out = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(&rgb).context("Failed to encode JPEG")?;
    Ok(out)
}

/// `foto.heic` -> `foto.jpg`, nothing -> `captura.jpg`
fn jpeg_file_name(file_name: Option<&str>) -> String {
    let stem = file_name
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(FALLBACK_STEM);
    format!("{}.jpg", stem)
}

/// MIME type from the file extension
pub fn guess_mime(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 3, Rgba([200, 10, 10, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_png_is_reencoded_as_jpeg() {
        let result = normalize_image(png_bytes(), Some("placa.png"), DEFAULT_JPEG_QUALITY);

        assert!(result.reencoded);
        assert_eq!(result.mime, "image/jpeg");
        assert_eq!(result.file_name, "placa.jpg");
        // JPEG SOI marker
        assert_eq!(&result.bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_missing_name_gets_default_stem() {
        let result = normalize_image(png_bytes(), None, 80);
        assert_eq!(result.file_name, "captura.jpg");
    }

    #[test]
    fn test_undecodable_input_is_forwarded_unchanged() {
        let original = b"\x00\x00\x00\x18ftypheic not really an image".to_vec();
        let result = normalize_image(original.clone(), Some("IMG_0001.HEIC"), DEFAULT_JPEG_QUALITY);

        assert!(!result.reencoded);
        assert_eq!(result.bytes, original);
        assert_eq!(result.file_name, "IMG_0001.HEIC");
        assert_eq!(result.mime, "image/heic");
    }

    #[test]
    fn test_empty_input_falls_back() {
        let result = normalize_image(Vec::new(), Some(""), DEFAULT_JPEG_QUALITY);
        assert!(!result.reencoded);
        assert!(result.bytes.is_empty());
        assert_eq!(result.file_name, "captura");
        assert_eq!(result.mime, "application/octet-stream");
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("a.JPG"), "image/jpeg");
        assert_eq!(guess_mime("b.webp"), "image/webp");
        assert_eq!(guess_mime("noext"), "application/octet-stream");
    }
}
