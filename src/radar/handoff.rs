//! Mobile hand-off
//!
//! The desktop shows a QR code pointing at the web app's mobile upload page
//! for the session; the phone normalizes its capture and uploads it.

use qrcode::render::unicode::Dense1x2;
use qrcode::types::QrError;
use qrcode::QrCode;
use reqwest::Url;
use std::sync::Arc;
use tracing::info;

use super::ScanError;
use crate::api::{ApiResult, OcrBroker, UploadAck};
use crate::vision::normalize_image;

/// Parse the web app origin hand-off URLs are built on
pub fn parse_origin(origin: &str) -> Result<Url, ScanError> {
    let url = Url::parse(origin)
        .map_err(|e| ScanError::InvalidOrigin(format!("{}: {}", origin, e)))?;
    if url.cannot_be_a_base() {
        return Err(ScanError::InvalidOrigin(origin.to_string()));
    }
    Ok(url)
}

/// `{origin}/radar/mobile-upload/{session_id}`
pub fn mobile_upload_url(origin: &Url, session_id: &str) -> Url {
    let mut url = origin.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty()
            .extend(["radar", "mobile-upload", session_id]);
    }
    url
}

/// QR code for a hand-off URL, two modules per character cell.
/// Colors are inverted so it scans on dark terminals.
pub fn render_qr(url: &Url) -> Result<String, QrError> {
    let code = QrCode::new(url.as_str().as_bytes())?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Phone-side half of the hand-off
#[derive(Clone)]
pub struct MobileUploader {
    broker: Arc<dyn OcrBroker>,
    jpeg_quality: u8,
}

impl MobileUploader {
    pub fn new(broker: Arc<dyn OcrBroker>, jpeg_quality: u8) -> Self {
        Self {
            broker,
            jpeg_quality,
        }
    }

    /// Normalize a capture and upload it to `session_id`
    pub async fn upload(
        &self,
        session_id: &str,
        bytes: Vec<u8>,
        file_name: Option<&str>,
    ) -> ApiResult<UploadAck> {
        let image = normalize_image(bytes, file_name, self.jpeg_quality);
        info!(
            "Sending {} ({}, {} bytes) to session {}",
            image.file_name,
            image.mime,
            image.bytes.len(),
            session_id
        );
        self.broker.upload_image(session_id, image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::poller::tests::ScriptedBroker;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_mobile_upload_url() {
        let origin = parse_origin("http://192.168.0.10:3000").unwrap();
        let url = mobile_upload_url(&origin, "abc123");
        assert_eq!(url.as_str(), "http://192.168.0.10:3000/radar/mobile-upload/abc123");
    }

    #[test]
    fn test_mobile_upload_url_keeps_origin_path() {
        let origin = parse_origin("https://yard.example.com/console/").unwrap();
        let url = mobile_upload_url(&origin, "a b");
        assert_eq!(
            url.as_str(),
            "https://yard.example.com/console/radar/mobile-upload/a%20b"
        );
    }

    #[test]
    fn test_parse_origin_rejects_garbage() {
        assert!(matches!(parse_origin("localhost"), Err(ScanError::InvalidOrigin(_))));
        assert!(matches!(parse_origin("mailto:yard@example.com"), Err(ScanError::InvalidOrigin(_))));
    }

    #[test]
    fn test_render_qr_is_square_block() {
        let origin = parse_origin("http://192.168.0.10:3000").unwrap();
        let qr = render_qr(&mobile_upload_url(&origin, "abc123")).unwrap();

        let lines: Vec<&str> = qr.lines().collect();
        assert!(lines.len() > 10);
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|line| line.chars().count() == width));
        // Two modules per cell: height is about half the width
        assert!(lines.len() * 2 >= width && lines.len() * 2 <= width + 2);
        assert!(qr.chars().any(|c| matches!(c, '█' | '▀' | '▄')));
    }

    #[test]
    fn test_render_qr_differs_per_session() {
        let origin = parse_origin("http://localhost:3000").unwrap();
        let first = render_qr(&mobile_upload_url(&origin, "session-1")).unwrap();
        let second = render_qr(&mobile_upload_url(&origin, "session-2")).unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_upload_sends_jpeg() {
        let broker = Arc::new(ScriptedBroker::new(Vec::new()));
        let uploader = MobileUploader::new(broker.clone(), 92);

        let mut png = Cursor::new(Vec::new());
        RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        uploader
            .upload("abc123", png.into_inner(), Some("shot.png"))
            .await
            .unwrap();

        let uploads = broker.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "abc123");
        assert_eq!(uploads[0].1.file_name, "shot.jpg");
        assert_eq!(uploads[0].1.mime, "image/jpeg");
    }

    #[tokio::test]
    async fn test_upload_forwards_original_when_normalization_fails() {
        let broker = Arc::new(ScriptedBroker::new(Vec::new()));
        let uploader = MobileUploader::new(broker.clone(), 92);
        let original = b"not an image at all".to_vec();

        uploader
            .upload("abc123", original.clone(), Some("photo.heic"))
            .await
            .unwrap();

        let uploads = broker.uploads.lock();
        assert_eq!(uploads[0].1.bytes, original);
        assert_eq!(uploads[0].1.file_name, "photo.heic");
        assert!(!uploads[0].1.reencoded);
    }
}
