//! Endpoint lifecycle states.
//!
//! Client and server endpoints move through the same stages:
//!
//! ```text
//! Uninitialized --initialize--> Initialized --connect/--------> Connected
//!                                            wait_for_connection
//!                                  ^  |                            |
//!                                  |  | (in flight: Connecting)    | begin_read
//!                                  +--+ (attach failed)            v
//!                                                               ReadActive
//!
//!                  close() from any state ----> Closed (terminal)
//! ```
//!
//! Calling an operation from the wrong stage is a programming error and
//! panics; a failed connection attempt is not, and simply returns the
//! endpoint to `Initialized`.

/// Stage an endpoint is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, no transport configured yet.
    Uninitialized,
    /// Transport configured: the client knows its target, the server is
    /// bound and listening.
    Initialized,
    /// A connect or accept is in flight.
    Connecting,
    /// A live stream is attached and the connection engine is available.
    Connected,
    /// The background read loop has been started.
    ReadActive,
    /// Terminal; the endpoint cannot be reused.
    Closed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ReadActive => "read-active",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Panic unless the endpoint is in the stage `operation` requires.
pub(crate) fn require(current: LifecycleState, required: LifecycleState, operation: &str) {
    if current != required {
        panic!("{operation} requires {required} state, but the endpoint is {current}");
    }
}
