//! Flush Scheduler
//!
//! One timer task per live range. Each firing snapshots the range, hands the
//! snapshot to the renderer and emits `refreshed`. The first firing happens one
//! period after scheduling. A flush is awaited before the next tick is taken,
//! so flushes of one range never overlap; ticks missed while a slow write is in
//! flight are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::error::{EngineError, RangeError};
use crate::application::ports::Renderer;
use crate::application::services::materializer::Materializer;
use crate::application::signal::{EngineSignals, Refreshed};
use crate::domain::live_range::RangeId;
use crate::infrastructure::metrics::{self, FlushOutcome};

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything a timer task needs to flush its range.
#[derive(Clone)]
struct Flusher {
    materializer: Arc<Materializer>,
    renderer: Arc<dyn Renderer>,
    signals: Arc<EngineSignals>,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// Snapshot written and `refreshed` emitted.
    Written,
    /// The renderer failed; the next firing retries.
    Failed,
    /// The range no longer exists.
    RangeGone,
}

/// Per-range periodic flush timers.
pub struct FlushScheduler {
    flusher: Flusher,
    timers: Mutex<HashMap<RangeId, Timer>>,
}

impl FlushScheduler {
    /// Create a scheduler flushing `materializer` ranges into `renderer`.
    #[must_use]
    pub fn new(
        materializer: Arc<Materializer>,
        renderer: Arc<dyn Renderer>,
        signals: Arc<EngineSignals>,
    ) -> Self {
        Self {
            flusher: Flusher {
                materializer,
                renderer,
                signals,
            },
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Start the timer for `range_id`, replacing any existing one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, range_id: RangeId, period: Duration) {
        let cancel = CancellationToken::new();
        let flusher = self.flusher.clone();
        let task_cancel = cancel.clone();
        let task_id = range_id.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if flusher.flush(&task_id).await == FlushResult::RangeGone {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(range_id = %task_id, "Flush timer stopped");
        });

        let previous = self
            .timers
            .lock()
            .insert(range_id.clone(), Timer { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        tracing::debug!(
            range_id = %range_id,
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Flush timer scheduled"
        );
    }

    /// Flush one range immediately, outside its timer.
    pub async fn flush_once(&self, range_id: &RangeId) -> FlushResult {
        self.flusher.flush(range_id).await
    }

    /// Stop the timer for `range_id`. An in-flight flush is allowed to finish.
    ///
    /// Returns `false` if no timer was running.
    pub fn cancel(&self, range_id: &RangeId) -> bool {
        let timer = self.timers.lock().remove(range_id);
        timer.is_some_and(|timer| {
            timer.cancel.cancel();
            true
        })
    }

    /// Stop every timer and wait for in-flight flushes to finish.
    pub async fn cancel_all(&self) {
        let timers: Vec<(RangeId, Timer)> = self.timers.lock().drain().collect();
        for (_, timer) in &timers {
            timer.cancel.cancel();
        }
        for (range_id, timer) in timers {
            if let Err(e) = timer.handle.await {
                tracing::warn!(range_id = %range_id, error = %e, "Flush task ended abnormally");
            }
        }
    }

    /// Number of running timers.
    #[must_use]
    pub fn active(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Flusher {
    async fn flush(&self, range_id: &RangeId) -> FlushResult {
        let started = std::time::Instant::now();

        let snapshot = match self.materializer.snapshot(range_id) {
            Ok(snapshot) => snapshot,
            Err(RangeError::NotFound(_)) => {
                tracing::debug!(range_id = %range_id, "Range closed before flush");
                return FlushResult::RangeGone;
            }
            Err(e) => {
                tracing::warn!(range_id = %range_id, error = %e, "Snapshot failed");
                return FlushResult::Failed;
            }
        };

        match self.renderer.write(range_id, &snapshot).await {
            Ok(()) => {
                metrics::record_flush(FlushOutcome::Success, started.elapsed());
                tracing::trace!(range_id = %range_id, rows = snapshot.rows.len(), "Range flushed");
                self.signals.refreshed.emit(&Refreshed {
                    range_id: range_id.clone(),
                    completed_at: Utc::now(),
                });
                FlushResult::Written
            }
            Err(e) => {
                metrics::record_flush(FlushOutcome::Failure, started.elapsed());
                tracing::warn!(range_id = %range_id, error = %e, "Render failed, retrying next period");
                self.signals.error.emit(&EngineError::Render(e));
                FlushResult::Failed
            }
        }
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{MockControlChannel, MockRenderer, RenderWriteError};
    use crate::application::services::registry::SubscriptionRegistry;
    use crate::domain::live_range::Snapshot;
    use crate::domain::streaming::SecurityKey;

    /// Renderer that takes `delay` per write and tracks overlap.
    #[derive(Debug, Default)]
    struct SlowRenderer {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        started: AtomicUsize,
        completed: AtomicUsize,
    }

    impl SlowRenderer {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Renderer for SlowRenderer {
        async fn write(&self, _range_id: &RangeId, _snapshot: &Snapshot) -> Result<(), RenderWriteError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup(renderer: MockRenderer) -> (FlushScheduler, Arc<Materializer>, Arc<EngineSignals>) {
        setup_with(Arc::new(renderer))
    }

    fn setup_with(
        renderer: Arc<dyn Renderer>,
    ) -> (FlushScheduler, Arc<Materializer>, Arc<EngineSignals>) {
        let mut channel = MockControlChannel::new();
        channel.expect_is_connected().return_const(false);
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(channel)));
        let signals = Arc::new(EngineSignals::new());
        let materializer = Arc::new(Materializer::new(registry, Arc::clone(&signals)));
        let scheduler =
            FlushScheduler::new(Arc::clone(&materializer), renderer, Arc::clone(&signals));
        (scheduler, materializer, signals)
    }

    fn create(materializer: &Materializer, id: &str, period: Duration) {
        materializer
            .create_range(
                id.into(),
                vec![SecurityKey::ticker_only("AAPL")],
                vec!["last".to_string()],
                period,
            )
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn independent_periods() {
        let mut renderer = MockRenderer::new();
        renderer
            .expect_write()
            .withf(|id, _| id.as_str() == "fast")
            .times(5)
            .returning(|_, _| Ok(()));
        renderer
            .expect_write()
            .withf(|id, _| id.as_str() == "slow")
            .times(2)
            .returning(|_, _| Ok(()));

        let (scheduler, materializer, signals) = setup(renderer);
        let refreshed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refreshed);
        signals.refreshed.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for (id, period) in [("fast", 2000), ("slow", 5000)] {
            let period = Duration::from_millis(period);
            create(&materializer, id, period);
            scheduler.schedule(id.into(), period);
        }

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        scheduler.cancel_all().await;

        assert_eq!(refreshed.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn first_flush_after_one_period() {
        let mut renderer = MockRenderer::new();
        renderer.expect_write().times(1).returning(|_, _| Ok(()));
        let (scheduler, materializer, _) = setup(renderer);

        create(&materializer, "r", Duration::from_secs(5));
        scheduler.schedule("r".into(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.cancel_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn render_failure_is_retried() {
        let mut renderer = MockRenderer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        renderer.expect_write().returning(move |id, _| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RenderWriteError::new(id, "disk full"))
            } else {
                Ok(())
            }
        });
        let (scheduler, materializer, signals) = setup(renderer);

        let errors = Arc::new(AtomicUsize::new(0));
        let error_count = Arc::clone(&errors);
        signals.error.connect(move |e| {
            if e.kind() == "render" {
                error_count.fetch_add(1, Ordering::SeqCst);
            }
        });

        create(&materializer, "r", Duration::from_secs(1));
        scheduler.schedule("r".into(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        scheduler.cancel_all().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_further_flushes() {
        let mut renderer = MockRenderer::new();
        renderer.expect_write().times(1).returning(|_, _| Ok(()));
        let (scheduler, materializer, _) = setup(renderer);

        create(&materializer, "r", Duration::from_secs(1));
        scheduler.schedule("r".into(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(scheduler.cancel(&"r".into()));
        assert!(!scheduler.cancel(&"r".into()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_renderer_never_overlaps_flushes() {
        let renderer = Arc::new(SlowRenderer::new(Duration::from_millis(2_500)));
        let (scheduler, materializer, _) = setup_with(Arc::clone(&renderer) as Arc<dyn Renderer>);

        create(&materializer, "r", Duration::from_secs(1));
        scheduler.schedule("r".into(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(10)).await;
        scheduler.cancel_all().await;

        assert_eq!(renderer.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(renderer.completed.load(Ordering::SeqCst) >= 3);
        assert_eq!(
            renderer.started.load(Ordering::SeqCst),
            renderer.completed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_in_flight_flush_finish() {
        let renderer = Arc::new(SlowRenderer::new(Duration::from_millis(2_500)));
        let (scheduler, materializer, signals) =
            setup_with(Arc::clone(&renderer) as Arc<dyn Renderer>);
        let refreshed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refreshed);
        signals.refreshed.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        create(&materializer, "r", Duration::from_secs(1));
        scheduler.schedule("r".into(), Duration::from_secs(1));

        // First write starts at 1s and is still running at 1.5s
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(renderer.started.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.completed.load(Ordering::SeqCst), 0);

        assert!(scheduler.cancel(&"r".into()));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(renderer.started.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.completed.load(Ordering::SeqCst), 1);
        assert_eq!(refreshed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_stops_when_range_closes() {
        let mut renderer = MockRenderer::new();
        renderer.expect_write().never();
        let (scheduler, materializer, _) = setup(renderer);

        create(&materializer, "r", Duration::from_secs(1));
        scheduler.schedule("r".into(), Duration::from_secs(1));
        materializer.close_range(&"r".into()).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.cancel_all().await;
    }

    #[tokio::test]
    async fn flush_once_reports_missing_range() {
        let (scheduler, _, _) = setup(MockRenderer::new());
        assert_eq!(
            scheduler.flush_once(&"missing".into()).await,
            FlushResult::RangeGone
        );
    }
}
