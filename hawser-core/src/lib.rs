//! # hawser-core
//!
//! Shared leaf types for the hawser IPC engine.
//!
//! This crate provides the building blocks the engine and applications both
//! depend on:
//!
//! - **Identifiers**: [`MessageId`] and [`CallbackToken`], 128-bit random ids
//! - **Payload descriptors**: [`PayloadType`], the value-matched schema tag
//! - **Codec trait**: [`MessageCodec`], pluggable message serialization, with
//!   [`JsonCodec`] as the provided implementation
//! - **Network provider**: [`NetworkProvider`], the connection-establishment
//!   seam, with [`TcpNetworkProvider`] for real TCP
//!
//! Everything here is `Send + Sync`: the engine built on top is driven from
//! arbitrary caller tasks concurrently with its background read loop.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod id;
mod net;
mod payload;

// Codec exports
pub use codec::{CodecError, JsonCodec, MessageCodec};

// Identifier exports
pub use id::{CallbackToken, MessageId};

// Network provider exports
pub use net::{NetworkListener, NetworkProvider, TcpNetworkListener, TcpNetworkProvider};

// Payload descriptor exports
pub use payload::PayloadType;
