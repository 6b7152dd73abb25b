//! Local plate recognition
//!
//! Recognizers return raw OCR text; plate cleanup and the confidence check
//! are shared so every capture path accepts the same plates.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Shortest string accepted as a plate (Brazilian plates have 7 characters)
pub const MIN_PLATE_LEN: usize = 7;

/// Characters a plate can contain
const PLATE_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Reduce raw OCR text to an uppercase alphanumeric token
pub fn clean_plate(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Clean `text` and keep it only if it is long enough to be a plate
pub fn accept_plate(text: &str) -> Option<String> {
    let plate = clean_plate(text);
    (plate.len() >= MIN_PLATE_LEN).then_some(plate)
}

/// Something that can turn an image into text
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    /// Run recognition over encoded image bytes, returning raw text
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

/// Recognizer backed by the `tesseract` command-line tool
#[derive(Debug, Clone)]
pub struct TesseractCli {
    /// Executable name or path
    pub binary: String,
    /// Traineddata language (e.g. "por")
    pub lang: String,
}

impl TesseractCli {
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            binary: "tesseract".to_string(),
            lang: lang.into(),
        }
    }
}

#[async_trait]
impl PlateRecognizer for TesseractCli {
    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let whitelist = format!("tessedit_char_whitelist={}", PLATE_WHITELIST);
        // psm 7: treat the image as a single text line
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.lang, "--psm", "7", "-c", &whitelist])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.binary))?;

        let mut stdin = child.stdin.take().context("tesseract stdin unavailable")?;
        stdin
            .write_all(image)
            .await
            .context("Failed to send image to tesseract")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("Failed to read tesseract output")?;

        if !output.status.success() {
            bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("tesseract output: {:?}", text);
        Ok(text)
    }
}
