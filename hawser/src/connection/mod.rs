//! The connection engine.
//!
//! A [`Connection`] owns one open duplex stream, one callback registry, and
//! one pending-invoke table, and exposes the whole messaging surface:
//! registration (`on`/`on_invoke`/`off`), fire-and-forget [`Connection::send`],
//! correlated [`Connection::invoke`], and the background read loop started by
//! [`Connection::begin_read`].
//!
//! # Architecture
//!
//! ```text
//!  callers (any task)                      read loop (one task)
//!  ──────────────────                      ────────────────────
//!  send ──► encode ──► write lock ──►  │   deframe ◄── stream
//!  invoke ─► pending table ──► write ──►  │   decode
//!                 ▲                        │   ├─ reply? ──► resolve pending
//!                 └────── resolve ─────────┘   └─ else ───► registry dispatch
//!                                                            └─ replies ──► write lock
//! ```
//!
//! The write half is behind a lock shared by `send`, `invoke`, and handler
//! replies, so frames never interleave. The read half belongs to the single
//! read loop; nothing else touches it.

/// Core connection implementation and read loop.
pub mod core;

/// Configuration for connection behavior.
pub mod config;

/// Error types for connection operations.
pub mod error;

pub use config::ConnectionConfig;
pub use core::Connection;
pub use error::{InvokeError, SendError};
