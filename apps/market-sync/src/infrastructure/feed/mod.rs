//! Market Data Feed Adapters
//!
//! Transports and the wire codec for the feed.
//!
//! - `websocket`: `ws://` / `wss://` transport
//! - `memory`: in-process loopback for tests and demos
//! - `codec`: JSON frame decoder

pub mod codec;
pub mod memory;
pub mod websocket;

pub use codec::JsonFeedCodec;
pub use memory::{MemoryPeer, MemoryServer, MemoryTransport, memory_transport};
pub use websocket::WebSocketTransport;
