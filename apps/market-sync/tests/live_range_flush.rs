//! Live Range Flush Integration Tests
//!
//! Timer cadence per range and rendering to disk.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use market_sync::{
    EngineConfig, JsonFeedCodec, JsonFileRenderer, RangeId, Refreshed, RenderWriteError, Renderer,
    SecurityKey, Snapshot, SyncEngine, memory_transport,
};

/// Counts writes per range.
#[derive(Debug, Default)]
struct CountingRenderer {
    writes: Mutex<HashMap<RangeId, usize>>,
}

impl CountingRenderer {
    fn count(&self, id: &str) -> usize {
        self.writes.lock().get(&RangeId::new(id)).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    async fn write(&self, range_id: &RangeId, _snapshot: &Snapshot) -> Result<(), RenderWriteError> {
        *self.writes.lock().entry(range_id.clone()).or_default() += 1;
        Ok(())
    }
}

fn engine_with(renderer: Arc<dyn Renderer>) -> SyncEngine {
    let (transport, _server) = memory_transport();
    SyncEngine::new(
        EngineConfig::default(),
        Arc::new(transport),
        Arc::new(JsonFeedCodec::new()),
        renderer,
    )
}

fn securities() -> Vec<SecurityKey> {
    vec![SecurityKey::new("AAPL", "NASDAQ"), SecurityKey::new("MSFT", "NASDAQ")]
}

fn fields() -> Vec<String> {
    vec!["last".to_string(), "volume".to_string()]
}

#[tokio::test(start_paused = true)]
async fn ranges_flush_on_their_own_periods() {
    let renderer = Arc::new(CountingRenderer::default());
    let engine = engine_with(Arc::clone(&renderer) as Arc<dyn Renderer>);

    engine
        .create_live_range("fast", securities(), fields(), Some(Duration::from_millis(2000)))
        .unwrap();
    engine
        .create_live_range("slow", securities(), fields(), Some(Duration::from_millis(5000)))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10_500)).await;

    assert_eq!(renderer.count("fast"), 5);
    assert_eq!(renderer.count("slow"), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn default_period_applies() {
    let renderer = Arc::new(CountingRenderer::default());
    let engine = engine_with(Arc::clone(&renderer) as Arc<dyn Renderer>);

    engine
        .create_live_range("r", securities(), fields(), None)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(renderer.count("r"), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(renderer.count("r"), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn closed_range_stops_flushing() {
    let renderer = Arc::new(CountingRenderer::default());
    let engine = engine_with(Arc::clone(&renderer) as Arc<dyn Renderer>);

    engine
        .create_live_range("r", securities(), fields(), Some(Duration::from_secs(1)))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    engine.close_live_range(&"r".into()).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(renderer.count("r"), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn snapshots_are_written_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(Arc::new(JsonFileRenderer::new(dir.path())));

    let (tx, mut refreshed) = mpsc::unbounded_channel();
    engine.signals().refreshed.connect(move |event: &Refreshed| {
        let _ = tx.send(event.range_id.clone());
    });

    engine
        .create_live_range("tech", securities(), fields(), Some(Duration::from_millis(50)))
        .unwrap();

    let id = timeout(Duration::from_secs(5), refreshed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, RangeId::new("tech"));

    let text = std::fs::read_to_string(dir.path().join("tech.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["range_id"], "tech");
    assert_eq!(json["rows"].as_array().unwrap().len(), 2);
    assert_eq!(json["rows"][1]["security"]["ticker"], "MSFT");

    engine.shutdown().await;
}
