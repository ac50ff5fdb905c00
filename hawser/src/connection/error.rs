//! Error types for connection operations.
//!
//! These cover expected runtime failures: transient I/O and correlation
//! failures callers must handle. Lifecycle misuse (double `begin_read`, zero
//! timeouts) is not represented here; those are programming errors and panic
//! at the call site.

use std::time::Duration;

use thiserror::Error;

use hawser_core::{CodecError, MessageId};

use crate::wire::WireError;

/// Errors surfaced by [`Connection::send`](crate::Connection::send).
#[derive(Debug, Error)]
pub enum SendError {
    /// The frame could not be written within the caller's timeout.
    #[error("send timed out after {timeout:?}")]
    Timeout {
        /// The caller-supplied bound.
        timeout: Duration,
    },

    /// The payload or envelope failed to encode.
    #[error("encode failed: {0}")]
    Encode(#[from] CodecError),

    /// The frame could not be written to the stream.
    #[error("write failed: {0}")]
    Wire(#[from] WireError),
}

/// Errors surfaced by [`Connection::invoke`](crate::Connection::invoke).
#[derive(Debug, Error)]
pub enum InvokeError {
    /// No reply arrived within the caller's timeout.
    ///
    /// A reply arriving later is dropped by the read loop; the pending entry
    /// is already gone.
    #[error("invoke timed out after {timeout:?}")]
    Timeout {
        /// The caller-supplied bound.
        timeout: Duration,
    },

    /// A pending entry for this request id already exists.
    ///
    /// Ids are 128-bit random, so this cannot happen in practice; it is
    /// checked defensively and nothing is sent when it trips.
    #[error("a request with id {id} is already pending")]
    DuplicateId {
        /// The colliding request id.
        id: MessageId,
    },

    /// The read loop ended before the reply arrived; none can come now.
    #[error("connection closed before the reply arrived")]
    ConnectionClosed,

    /// The request could not be sent.
    #[error("send failed: {0}")]
    Send(#[from] SendError),

    /// The reply arrived but its content did not decode as the expected
    /// type.
    #[error("could not decode reply: {0}")]
    Decode(#[source] CodecError),
}
