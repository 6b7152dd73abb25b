//! Occupancy grid poller
//!
//! Fetches the slot map immediately and then at a fixed interval. A failed
//! fetch is skipped and the next tick tries again: the board is a status
//! display, not a source of truth.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::grid::OccupancyGrid;
use crate::api::{ApiResult, SlotMapSource};

type GridSender = Arc<watch::Sender<Option<OccupancyGrid>>>;

/// Background poller publishing the latest occupancy grid
pub struct GridWatcher {
    source: Arc<dyn SlotMapSource>,
    latest: GridSender,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl GridWatcher {
    /// Start polling. Must be called from within a tokio runtime.
    pub fn spawn(source: Arc<dyn SlotMapSource>, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        let latest = Arc::new(tx);
        let token = CancellationToken::new();

        info!("Watching slot map every {:?}", interval);
        let task = tokio::spawn(watch_loop(
            source.clone(),
            interval,
            latest.clone(),
            token.clone(),
        ));

        Self {
            source,
            latest,
            token,
            task: Some(task),
        }
    }

    /// Receiver notified on every successful fetch
    pub fn subscribe(&self) -> watch::Receiver<Option<OccupancyGrid>> {
        self.latest.subscribe()
    }

    /// Most recent grid, if any fetch succeeded yet
    pub fn latest(&self) -> Option<OccupancyGrid> {
        self.latest.borrow().clone()
    }

    /// Fetch now and publish the result
    pub async fn refresh(&self) -> ApiResult<OccupancyGrid> {
        refresh_once(self.source.as_ref(), &self.latest).await
    }

    /// Free a slot, then re-fetch the whole map instead of patching it locally
    pub async fn release(&self, box_id: i64) -> ApiResult<()> {
        self.source.release_box(box_id).await?;
        info!("Released box {}", box_id);

        if let Err(e) = self.refresh().await {
            debug!("Refresh after release failed, waiting for next tick: {}", e);
        }
        Ok(())
    }

    /// Stop polling and release the timer
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for GridWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_once(source: &dyn SlotMapSource, latest: &GridSender) -> ApiResult<OccupancyGrid> {
    let snapshot = source.fetch_map().await?;
    let grid = OccupancyGrid::from_snapshot(&snapshot);
    latest.send_replace(Some(grid.clone()));
    Ok(grid)
}

async fn watch_loop(
    source: Arc<dyn SlotMapSource>,
    period: Duration,
    latest: GridSender,
    token: CancellationToken,
) {
    // First tick completes immediately
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = refresh_once(source.as_ref(), &latest) => result,
        };

        if let Err(e) = result {
            debug!("Slot map fetch failed, keeping previous board: {}", e);
        }
    }

    debug!("Slot map watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::BoxWithPlate;
    use crate::api::{ApiError, MapaResponse};
    use crate::vagas::grid::tests::{cell, snapshot};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory yard
    struct FakeYard {
        boxes: Mutex<Vec<BoxWithPlate>>,
        fetches: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl FakeYard {
        fn new(boxes: Vec<BoxWithPlate>) -> Self {
            Self {
                boxes: Mutex::new(boxes),
                fetches: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
            }
        }

        fn failing_first(self, n: usize) -> Self {
            self.failures_left.store(n, Ordering::SeqCst);
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SlotMapSource for FakeYard {
        async fn fetch_map(&self) -> ApiResult<MapaResponse> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ApiError::Status {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                });
            }
            Ok(snapshot(self.boxes.lock().clone()))
        }

        async fn release_box(&self, box_id: i64) -> ApiResult<()> {
            let mut boxes = self.boxes.lock();
            let item = boxes
                .iter_mut()
                .find(|b| b.slot.id_box == box_id)
                .ok_or_else(|| ApiError::Status {
                    status: 404,
                    message: format!("Box {} not found", box_id),
                })?;
            item.slot.status = "L".to_string();
            item.placa = None;
            Ok(())
        }
    }

    fn yard() -> FakeYard {
        FakeYard::new(vec![
            cell(1, "A1", "O", Some("XYZ9999")),
            cell(2, "A2", "L", None),
            cell(3, "B1", "L", None),
            cell(4, "B2", "O", Some("ABC1D23")),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_every_interval() {
        let source = Arc::new(yard());
        let watcher = GridWatcher::spawn(source.clone(), Duration::from_millis(2000));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.fetches(), 1);
        let grid = watcher.latest().unwrap();
        assert_eq!(grid.slot("A1").unwrap().display_value(), "XYZ9999");

        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_is_ignored() {
        let source = Arc::new(yard().failing_first(1));
        let watcher = GridWatcher::spawn(source.clone(), Duration::from_millis(2000));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(watcher.latest().is_none());

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(source.fetches(), 2);
        assert_eq!(watcher.latest().unwrap().occupied_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_refreshes_without_waiting_for_tick() {
        let source = Arc::new(yard());
        let watcher = GridWatcher::spawn(source.clone(), Duration::from_millis(2000));
        let mut updates = watcher.subscribe();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(watcher.latest().unwrap().slot("A1").unwrap().is_occupied());
        let _ = updates.borrow_and_update();

        watcher.release(1).await.unwrap();

        assert!(updates.has_changed().unwrap());
        let grid = watcher.latest().unwrap();
        let a1 = grid.slot("A1").unwrap();
        assert!(!a1.is_occupied());
        assert_eq!(a1.display_value(), "FREE");
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_error_is_returned() {
        let source = Arc::new(yard());
        let watcher = GridWatcher::spawn(source.clone(), Duration::from_millis(2000));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = watcher.release(99).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
        // No forced refresh when the release failed
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let source = Arc::new(yard());
        let mut watcher = GridWatcher::spawn(source.clone(), Duration::from_millis(2000));

        tokio::time::sleep(Duration::from_millis(100)).await;
        watcher.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(source.fetches(), 1);
        // Last board stays readable after stop
        assert!(watcher.latest().is_some());
    }
}
