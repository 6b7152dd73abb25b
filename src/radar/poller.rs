//! OCR session poller
//!
//! Polls `status-sessao` at a fixed interval until the session reaches a
//! terminal state, then fires a one-shot callback. A failed request ends
//! the loop; there is no retry.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{OcrBroker, OcrSession, SessionStatus};

/// Message used when the backend reports an error without details
pub const DEFAULT_ERROR_MESSAGE: &str = "Try again.";

/// Message used when the status request itself fails
pub const COMMUNICATION_ERROR_MESSAGE: &str = "Communication error. Try again.";

/// Terminal result of a polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The backend recognized a plate
    Recognized(String),
    /// The session failed or the backend could not be reached
    Failed(String),
}

/// Callback invoked once with the terminal outcome
pub type OutcomeCallback = Box<dyn FnOnce(PollOutcome) + Send + 'static>;

type CallbackSlot = Arc<Mutex<Option<OutcomeCallback>>>;

/// Decide whether a status snapshot ends the loop
pub fn evaluate(session: &OcrSession) -> Option<PollOutcome> {
    if !session.status.is_terminal() {
        return None;
    }
    match session.status {
        SessionStatus::Completed => session
            .recognized_plate
            .as_deref()
            .map(str::trim)
            .filter(|plate| !plate.is_empty())
            .map(|plate| PollOutcome::Recognized(plate.to_string())),
        SessionStatus::Error => {
            let message = session
                .error_message
                .as_deref()
                .map(str::trim)
                .filter(|msg| !msg.is_empty())
                .unwrap_or(DEFAULT_ERROR_MESSAGE);
            Some(PollOutcome::Failed(message.to_string()))
        }
        SessionStatus::Pending | SessionStatus::Processing => None,
    }
}

/// Spawns polling loops against an OCR broker
#[derive(Clone)]
pub struct SessionPoller {
    broker: Arc<dyn OcrBroker>,
    interval: Duration,
}

impl SessionPoller {
    pub fn new(broker: Arc<dyn OcrBroker>, interval: Duration) -> Self {
        Self { broker, interval }
    }

    /// Start polling `session_id`. The first request goes out one interval
    /// after this call. Must be called from within a tokio runtime.
    pub fn start<F>(&self, session_id: impl Into<String>, on_outcome: F) -> PollHandle
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        let session_id = session_id.into();
        let token = CancellationToken::new();
        let callback: OutcomeCallback = Box::new(on_outcome);
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(callback)));

        info!(
            "Polling OCR session {} every {:?}",
            session_id, self.interval
        );

        let task = tokio::spawn(poll_loop(
            self.broker.clone(),
            session_id.clone(),
            self.interval,
            token.clone(),
            slot.clone(),
        ));

        PollHandle {
            session_id,
            token,
            slot,
            task: Some(task),
        }
    }
}

/// Owner of a running polling loop. Dropping it stops the loop.
pub struct PollHandle {
    session_id: String,
    token: CancellationToken,
    slot: CallbackSlot,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Session being polled
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the loop is still waiting for a terminal state
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .task
                .as_ref()
                .map(|task| !task.is_finished())
                .unwrap_or(false)
    }

    /// Stop polling. Once this returns the callback will not be invoked,
    /// even if a status request is still in flight.
    pub fn stop(&mut self) {
        self.token.cancel();
        // Waits for a callback that is running right now
        let dropped = self.slot.lock().take();
        if let Some(task) = self.task.take() {
            task.abort();
            if dropped.is_some() {
                debug!("Polling for session {} stopped", self.session_id);
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    broker: Arc<dyn OcrBroker>,
    session_id: String,
    period: Duration,
    token: CancellationToken,
    slot: CallbackSlot,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            response = broker.session_status(&session_id) => response,
        };

        let outcome = match response {
            Ok(session) => {
                debug!("Session {} status: {:?}", session_id, session.status);
                evaluate(&session)
            }
            Err(e) => {
                warn!("Status request for session {} failed: {}", session_id, e);
                Some(PollOutcome::Failed(COMMUNICATION_ERROR_MESSAGE.to_string()))
            }
        };

        if let Some(outcome) = outcome {
            fire(&slot, &token, outcome);
            return;
        }
    }
}

/// Invoke the callback under the slot lock, unless the loop was stopped
fn fire(slot: &CallbackSlot, token: &CancellationToken, outcome: PollOutcome) {
    let mut guard = slot.lock();
    if token.is_cancelled() {
        return;
    }
    if let Some(callback) = guard.take() {
        callback(outcome);
    }
}
