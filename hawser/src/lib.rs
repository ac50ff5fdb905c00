//! # Hawser
//!
//! Message-oriented IPC over any ordered, reliable byte stream.
//!
//! This crate provides:
//! - **Wire framing**: length-prefixed frames with clean closed-stream
//!   detection
//! - **Envelopes**: self-describing messages with ids, type tags, and reply
//!   correlation
//! - **Connection engine**: registration-order callback dispatch plus
//!   request/response `invoke` over one duplex stream
//! - **Endpoints**: client/server lifecycle wrappers and a router that
//!   tracks live connections by name
//!
//! A connection is symmetric once established: both sides register callbacks
//! with `on`/`on_invoke`, push messages with `send`, and call peers with
//! `invoke`. One background task per connection owns the read side; writes
//! from any task are serialized so frames never interleave.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use hawser_core::{
    CallbackToken, CodecError, JsonCodec, MessageCodec, MessageId, NetworkListener,
    NetworkProvider, PayloadType, TcpNetworkListener, TcpNetworkProvider,
};

// =============================================================================
// Modules
// =============================================================================

/// Per-connection callback registry.
pub mod callbacks;

/// Client endpoint.
pub mod client;

/// Connection engine: messaging surface and the read loop.
pub mod connection;

/// Envelope data model and message-type tags.
pub mod envelope;

/// Endpoint lifecycle states.
pub mod lifecycle;

/// Named registry of live connections.
pub mod router;

/// Server endpoint.
pub mod server;

/// Length-prefixed wire framing.
pub mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

// Envelope exports
pub use envelope::{Envelope, Tag};

// Connection exports
pub use connection::{Connection, ConnectionConfig, InvokeError, SendError};

// Registry exports
pub use callbacks::CallbackRegistry;

// Endpoint exports
pub use client::IpcClient;
pub use lifecycle::LifecycleState;
pub use router::ConnectionRouter;
pub use server::IpcServer;

// Wire exports
pub use wire::{DEFAULT_MAX_FRAME_LEN, HEADER_LEN, WireError, frame, read_frame, write_frame};
