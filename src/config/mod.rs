//! Application Configuration
//!
//! Backend location and polling cadences stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `api.base_url`
pub const API_URL_ENV: &str = "PATIO_RADAR_API";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend connection settings
    pub api: ApiSettings,
    /// OCR hand-off settings
    pub radar: RadarSettings,
    /// Occupancy map settings
    pub vagas: VagasSettings,
    /// Upload image settings
    pub image: ImageSettings,
}

impl AppConfig {
    /// Apply environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL every endpoint is resolved against
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_secs: 15,
        }
    }
}

/// OCR hand-off settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarSettings {
    /// Session status polling interval
    pub poll_interval_ms: u64,
    /// Origin of the web app serving the mobile upload page
    pub handoff_origin: String,
    /// Tesseract language used for local recognition
    pub tesseract_lang: String,
}

impl Default for RadarSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            handoff_origin: "http://localhost:3000".to_string(),
            tesseract_lang: "por".to_string(),
        }
    }
}

impl RadarSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Occupancy map settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VagasSettings {
    /// Snapshot refresh interval
    pub poll_interval_ms: u64,
}

impl Default for VagasSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
        }
    }
}

impl VagasSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Upload image settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// JPEG quality factor (1-100)
    pub jpeg_quality: u8,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: crate::vision::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
