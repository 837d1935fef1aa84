//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Engine error types.
pub mod error;

/// Port interfaces for external systems (transport, decoder, renderer).
pub mod ports;

/// Application services: connection, registry, dispatch, live ranges.
pub mod services;

/// Typed observer lists for engine events.
pub mod signal;
