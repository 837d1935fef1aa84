//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionManager`: Feed connection lifecycle and reconnection
//! - `SubscriptionRegistry`: Active subscriptions and control messages
//! - `Dispatcher`: Routes inbound frames to callbacks and live ranges
//! - `Materializer`: Live range cell tables
//! - `FlushScheduler`: Periodic snapshot rendering
//! - `SyncEngine`: Facade tying the above together

pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod flush_scheduler;
pub mod materializer;
pub mod reconnect;
pub mod registry;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::{EngineConfig, EngineStatus, SyncEngine};
pub use flush_scheduler::{FlushResult, FlushScheduler};
pub use materializer::Materializer;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use registry::SubscriptionRegistry;
