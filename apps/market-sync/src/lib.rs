#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::items_after_statements
    )
)]

//! Market Sync - Live Market Data Synchronization Engine
//!
//! Keeps one streaming connection to a market data feed, multiplexes many
//! subscriptions over it, and materializes "live ranges" (security × field
//! matrices of the latest values) that are flushed to durable output on a
//! per-range period.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Security keys, ticks, connection state
//!   - `subscription`: Subscription table and ticker index
//!   - `live_range`: Cell tables and snapshots
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport, control channel, decoder and renderer interfaces
//!   - `services`: Connection manager, registry, dispatcher, materializer,
//!     flush scheduler and the `SyncEngine` facade
//!   - `signal`: Typed observer lists for engine events
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket and in-memory transports, JSON codec
//!   - `render`: JSON file renderer
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐    ┌────────────┐    ┌──────────────┐
//! Feed WS ──────►│ Connection │───►│ Dispatcher │───►│ Subscription │──► callbacks
//!         ◄──────│  Manager   │    └─────┬──────┘    │   Registry   │
//!   subscribe /  └────────────┘          │           └──────────────┘
//!   unsubscribe                          ▼
//!                                ┌──────────────┐    ┌─────────────┐
//!                                │ Materializer │───►│    Flush    │──► Renderer
//!                                └──────────────┘    │  Scheduler  │
//!                                                    └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::live_range::{RangeId, Snapshot, SnapshotRow};
pub use domain::streaming::{ConnectionState, FieldValue, SecurityKey, Tick};
pub use domain::subscription::{CallbackError, SubscriptionId};

// Engine
pub use application::error::{EngineError, RangeError};
pub use application::services::engine::{EngineConfig, EngineStatus, SyncEngine};
pub use application::signal::{EngineSignals, LiveDataUpdate, Refreshed};

// Ports
pub use application::ports::{
    FeedDecoder, RenderWriteError, Renderer, Transport, TransportError, TransportSession,
};

// Adapters
pub use infrastructure::config::{ConfigError, LiveRangeSpec, SyncConfig};
pub use infrastructure::feed::{JsonFeedCodec, MemoryTransport, WebSocketTransport, memory_transport};
pub use infrastructure::render::JsonFileRenderer;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
