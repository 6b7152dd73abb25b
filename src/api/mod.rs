//! Yard Backend Client
//!
//! Thin request/response wrapper over the REST backend: OCR session broker,
//! occupancy map, and the entity CRUD endpoints. No retries, no caching.

pub mod crud;
pub mod types;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiSettings;
use crate::vision::normalize::NormalizedImage;

pub use crud::{PageRequest, Resource};
pub use types::{
    MapaResponse, OcrSession, ParkRequest, ParkResponse, PlateLocation, SessionStatus,
    SessionTicket, SpringPage, UploadAck,
};

/// Errors raised by backend calls
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure or undecodable body
    #[error("communication error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Backend answered with a non-2xx status
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    /// The configured base URL can't be used to build endpoints
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// OCR session broker operations
#[async_trait]
pub trait OcrBroker: Send + Sync {
    /// Allocate a new capture session
    async fn start_session(&self) -> ApiResult<SessionTicket>;
    /// Fetch the current status of a session
    async fn session_status(&self, session_id: &str) -> ApiResult<OcrSession>;
    /// Upload a captured image for a session
    async fn upload_image(&self, session_id: &str, image: NormalizedImage) -> ApiResult<UploadAck>;
}

/// Source of occupancy snapshots
#[async_trait]
pub trait SlotMapSource: Send + Sync {
    /// Fetch the full slot map
    async fn fetch_map(&self) -> ApiResult<MapaResponse>;
    /// Free a slot; success is signaled by status alone
    async fn release_box(&self, box_id: i64) -> ApiResult<()>;
}

/// HTTP client for the yard backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client from API settings
    pub fn new(settings: &ApiSettings) -> ApiResult<Self> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", settings.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(settings.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Base URL all endpoints are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}`, percent-encoding each segment
    pub(crate) fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Park a plate, letting the backend pick the first free box when none is given
    pub async fn park_plate(&self, request: &ParkRequest) -> ApiResult<ParkResponse> {
        let url = self.endpoint(&["vagas", "armazenar"])?;
        let response = self.client.post(url).json(request).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Look up the box currently holding a plate
    pub async fn locate_plate(&self, plate: &str) -> ApiResult<PlateLocation> {
        let plate = plate.trim().to_uppercase();
        let url = self.endpoint(&["vagas", "buscar-placa", &plate])?;
        let response = self.client.get(url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

#[async_trait]
impl OcrBroker for ApiClient {
    async fn start_session(&self) -> ApiResult<SessionTicket> {
        let url = self.endpoint(&["radar", "iniciar-sessao"])?;
        let response = self.client.post(url).send().await?;
        let ticket: SessionTicket = check_status(response).await?.json().await?;
        debug!("OCR session allocated: {}", ticket.session_id);
        Ok(ticket)
    }

    async fn session_status(&self, session_id: &str) -> ApiResult<OcrSession> {
        let url = self.endpoint(&["radar", "status-sessao", session_id])?;
        let response = self.client.get(url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn upload_image(&self, session_id: &str, image: NormalizedImage) -> ApiResult<UploadAck> {
        let url = self.endpoint(&["radar", "upload-imagem", session_id])?;
        let size = image.bytes.len();
        let part = reqwest::multipart::Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.mime)?;
        let form = reqwest::multipart::Form::new().part("image", part);

        debug!("Uploading {} bytes to session {}", size, session_id);
        let response = self.client.post(url).multipart(form).send().await?;
        let body = check_status(response).await?.text().await?;

        // Acknowledgement shape is up to the backend
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

#[async_trait]
impl SlotMapSource for ApiClient {
    async fn fetch_map(&self) -> ApiResult<MapaResponse> {
        let url = self.endpoint(&["vagas", "mapa"])?;
        let response = self.client.get(url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn release_box(&self, box_id: i64) -> ApiResult<()> {
        let id = box_id.to_string();
        let url = self.endpoint(&["vagas", "liberar", &id])?;
        let response = self.client.post(url).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Pass 2xx responses through, turn anything else into `ApiError::Status`
pub(crate) async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Pull a human-readable message out of an error body
pub fn extract_error_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                if !text.trim().is_empty() {
                    return Some(text.trim().to_string());
                }
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') {
        None
    } else {
        Some(trimmed.to_string())
    }
}
