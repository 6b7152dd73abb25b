//! Capture workflow coordinator
//!
//! Owns at most one polling loop. Any new capture attempt (phone or local)
//! stops the previous loop before it starts.

use parking_lot::RwLock;
use reqwest::Url;
use std::sync::Arc;
use tracing::{info, warn};

use super::handoff::{mobile_upload_url, parse_origin};
use super::poller::{PollHandle, PollOutcome, SessionPoller};
use super::ScanError;
use crate::api::OcrBroker;
use crate::config::RadarSettings;
use crate::vision::{accept_plate, PlateRecognizer};

const IDLE_MESSAGE: &str = "Point the camera at the plate or use your phone.";

/// What the capture surface should currently display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStatus {
    /// Human-readable status line
    pub message: String,
    /// Session being polled, if any
    pub session_id: Option<String>,
    /// Last plate accepted by either capture path
    pub plate: Option<String>,
}

impl Default for ScanStatus {
    fn default() -> Self {
        Self {
            message: IDLE_MESSAGE.to_string(),
            session_id: None,
            plate: None,
        }
    }
}

/// Result of starting a phone hand-off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub session_id: String,
    /// URL to encode in the QR code
    pub upload_url: Url,
}

/// Drives both capture paths for one client
pub struct RadarScanner {
    broker: Arc<dyn OcrBroker>,
    poller: SessionPoller,
    handoff_origin: String,
    active: Option<PollHandle>,
    status: Arc<RwLock<ScanStatus>>,
}

impl RadarScanner {
    pub fn new(broker: Arc<dyn OcrBroker>, settings: &RadarSettings) -> Self {
        let poller = SessionPoller::new(broker.clone(), settings.poll_interval());
        Self {
            broker,
            poller,
            handoff_origin: settings.handoff_origin.clone(),
            active: None,
            status: Arc::new(RwLock::new(ScanStatus::default())),
        }
    }

    /// Snapshot of the current status
    pub fn status(&self) -> ScanStatus {
        self.status.read().clone()
    }

    /// Whether a phone session is still being polled
    pub fn is_waiting_for_phone(&self) -> bool {
        self.active.as_ref().map(PollHandle::is_active).unwrap_or(false)
    }

    /// Start a phone hand-off. `on_outcome` fires once when the session ends.
    pub async fn use_phone<F>(&mut self, on_outcome: F) -> Result<Handoff, ScanError>
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        if let Some(handle) = self.active.as_ref().filter(|h| h.is_active()) {
            return Err(ScanError::SessionActive(handle.session_id().to_string()));
        }
        self.cancel();

        // Checked before a backend session is allocated for nothing
        let origin = match parse_origin(&self.handoff_origin) {
            Ok(origin) => origin,
            Err(e) => {
                warn!("Cannot build hand-off URL: {}", e);
                self.set_message("Invalid phone hand-off address. Check the configuration.");
                return Err(e);
            }
        };

        self.set_message("Generating QR code...");
        let ticket = match self.broker.start_session().await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!("Failed to start OCR session: {}", e);
                self.set_message("Error starting phone session. Check the backend.");
                return Err(e.into());
            }
        };

        let upload_url = mobile_upload_url(&origin, &ticket.session_id);
        info!("Hand-off ready for session {}: {}", ticket.session_id, upload_url);

        {
            let mut status = self.status.write();
            status.message = "Scan the QR code with your phone.".to_string();
            status.session_id = Some(ticket.session_id.clone());
        }

        let status = self.status.clone();
        let handle = self.poller.start(ticket.session_id.clone(), move |outcome| {
            {
                let mut status = status.write();
                status.session_id = None;
                match &outcome {
                    PollOutcome::Recognized(plate) => {
                        status.message = format!("Plate {} received from phone!", plate);
                        status.plate = Some(plate.clone());
                    }
                    PollOutcome::Failed(message) => {
                        status.message = format!("Phone error: {}", message);
                    }
                }
            }
            on_outcome(outcome);
        });
        self.active = Some(handle);

        Ok(Handoff {
            session_id: ticket.session_id,
            upload_url,
        })
    }

    /// Abandon the current session, if any, and start a fresh hand-off.
    /// The abandoned loop's callback never fires.
    pub async fn restart<F>(&mut self, on_outcome: F) -> Result<Handoff, ScanError>
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        self.cancel();
        self.use_phone(on_outcome).await
    }

    /// Recognize a plate from a locally captured image
    pub async fn scan_local(
        &mut self,
        image: &[u8],
        recognizer: &dyn PlateRecognizer,
    ) -> Result<String, ScanError> {
        // Switching capture method abandons the phone session
        self.cancel();
        self.set_message("Processing plate...");

        let text = match recognizer.recognize(image).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Local recognition failed: {:#}", e);
                self.set_message("Recognition error. Try again.");
                return Err(ScanError::Recognition(format!("{:#}", e)));
            }
        };

        match accept_plate(&text) {
            Some(plate) => {
                let mut status = self.status.write();
                status.message = format!("Plate found: {}", plate);
                status.plate = Some(plate.clone());
                Ok(plate)
            }
            None => {
                self.set_message("Plate not recognized. Try again.");
                Err(ScanError::NotRecognized { raw: text })
            }
        }
    }

    /// Stop the current loop, if any, and return to idle
    pub fn cancel(&mut self) {
        if let Some(mut handle) = self.active.take() {
            if handle.is_active() {
                info!("Abandoning OCR session {}", handle.session_id());
            }
            handle.stop();
            let mut status = self.status.write();
            status.session_id = None;
            status.message = IDLE_MESSAGE.to_string();
        }
    }

    fn set_message(&self, message: &str) {
        self.status.write().message = message.to_string();
    }
}
