//! 128-bit random identifiers.
//!
//! Two id kinds live here:
//! - [`MessageId`]: identifies one envelope; the correlation key for replies
//! - [`CallbackToken`]: identifies one handler registration, for selective
//!   removal
//!
//! Both are two random `u64` halves, so collisions are negligible over a
//! process lifetime without any coordination.

use serde::{Deserialize, Serialize};

/// 128-bit random identifier for one envelope.
///
/// Fresh ids come from [`MessageId::random`]; every envelope a connection
/// produces gets its own. A reply envelope carries the request's id in its
/// `response_to` field, which is how the pending-invoke table matches replies
/// to waiters.
///
/// # Examples
///
/// ```
/// use hawser_core::MessageId;
///
/// let a = MessageId::random();
/// let b = MessageId::random();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    /// First 64 bits.
    pub first: u64,
    /// Second 64 bits.
    pub second: u64,
}

impl MessageId {
    /// Create an id with explicit values.
    pub const fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self {
            first: rand::random::<u64>(),
            second: rand::random::<u64>(),
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.first, self.second)
    }
}

/// Opaque handle for one callback registration.
///
/// Returned by every registration call; pass it back to remove exactly that
/// registration and no other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackToken {
    first: u64,
    second: u64,
}

impl CallbackToken {
    /// Generate a fresh random token.
    pub fn random() -> Self {
        Self {
            first: rand::random::<u64>(),
            second: rand::random::<u64>(),
        }
    }
}

impl std::fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.first, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_message_ids_are_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(MessageId::random()));
        }
    }

    #[test]
    fn message_id_display_is_32_hex_chars() {
        let id = MessageId::new(0x1, 0xabc);
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text, "00000000000000010000000000000abc");
    }

    #[test]
    fn message_id_serde_round_trip() {
        let id = MessageId::random();
        let json = serde_json::to_string(&id).expect("serialize");
        let back: MessageId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, back);
    }

    #[test]
    fn tokens_are_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            assert!(seen.insert(CallbackToken::random()));
        }
    }
}
