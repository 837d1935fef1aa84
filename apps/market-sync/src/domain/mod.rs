//! Domain Layer - Core market data types and business rules.
//!
//! This layer contains the core domain types for market data
//! synchronization. Nothing here performs I/O; every type is plain Rust
//! with serialization support.

/// Live ranges: cell tables and snapshots.
pub mod live_range;

/// Market data streaming types (securities, ticks, connection state).
pub mod streaming;

/// Subscription tracking and matching.
pub mod subscription;
