//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: Opens text sessions with the market data feed
//! - `ControlChannel`: Sends subscription control messages
//! - `FeedDecoder`: Decodes inbound frames into feed messages
//! - `Renderer`: Writes live range snapshots to durable output

mod control_port;
mod decoder_port;
mod renderer_port;
mod transport_port;

pub use control_port::{ControlChannel, ControlMessage, NotConnectedError, SendError};
pub use decoder_port::{ControlKind, FeedDecoder, FeedMessage, MalformedMessageError};
pub use renderer_port::{RenderWriteError, Renderer};
pub use transport_port::{
    InboundStream, OutboundSink, Transport, TransportError, TransportSession,
};

#[cfg(test)]
pub use control_port::MockControlChannel;
#[cfg(test)]
pub use decoder_port::MockFeedDecoder;
#[cfg(test)]
pub use renderer_port::MockRenderer;
