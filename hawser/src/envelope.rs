//! The envelope record exchanged on the wire.
//!
//! One envelope is one framed unit: identity, routing tag, payload-type
//! descriptor, payload bytes, and the optional reply-correlation id. Payload
//! bytes are opaque here; encoding and decoding them is the codec's job.

use std::hash::Hash;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use hawser_core::{MessageId, PayloadType};

/// Bound alias for application message-type tags.
///
/// Any small enum deriving `Serialize`/`Deserialize`, `Eq`, `Hash` and
/// `Clone` qualifies. The unit type `()` qualifies too and gives the
/// degenerate single-tag mode where dispatch is keyed purely by payload
/// type.
pub trait Tag:
    Clone + Eq + Hash + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Tag for T where
    T: Clone + Eq + Hash + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// The message record exchanged over the wire.
///
/// `response_to` is set if and only if this envelope answers an earlier one;
/// a reply's `payload_type` and `content` describe the handler's return
/// value, not the original request's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Unique identity; the correlation key a reply refers back to.
    pub id: MessageId,
    /// Application routing tag.
    pub message_type: T,
    /// Descriptor of the `content` schema; `None` when there is no payload.
    pub payload_type: Option<PayloadType>,
    /// Serialized payload bytes; may be empty.
    pub content: Vec<u8>,
    /// Id of the envelope being answered; `None` unless this is a reply.
    pub response_to: Option<MessageId>,
}

impl<T: Tag> Envelope<T> {
    /// Payload-free envelope with a fresh id.
    pub fn new(message_type: T) -> Self {
        Self {
            id: MessageId::random(),
            message_type,
            payload_type: None,
            content: Vec::new(),
            response_to: None,
        }
    }

    /// Envelope carrying pre-encoded payload bytes, with a fresh id.
    pub fn with_payload(message_type: T, payload_type: PayloadType, content: Vec<u8>) -> Self {
        Self {
            id: MessageId::random(),
            message_type,
            payload_type: Some(payload_type),
            content,
            response_to: None,
        }
    }

    /// Reply to `request`, correlated by its id and carrying its tag.
    ///
    /// The tag mirrors the request's; correlation relies solely on
    /// `response_to`.
    pub fn reply_to(request: &Self, payload_type: PayloadType, content: Vec<u8>) -> Self {
        Self {
            id: MessageId::random(),
            message_type: request.message_type.clone(),
            payload_type: Some(payload_type),
            content,
            response_to: Some(request.id),
        }
    }

    /// Whether this envelope answers an earlier one.
    pub fn is_reply(&self) -> bool {
        self.response_to.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hawser_core::{JsonCodec, MessageCodec};
    use std::collections::HashSet;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum ProbeTag {
        Ping,
        Pong,
    }

    #[test]
    fn ten_thousand_envelopes_have_distinct_ids() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let envelope = Envelope::new(ProbeTag::Ping);
            assert!(seen.insert(envelope.id));
        }
    }

    #[test]
    fn encodes_and_decodes_through_the_codec() {
        let codec = JsonCodec;
        let envelope = Envelope::with_payload(
            ProbeTag::Ping,
            PayloadType::of::<String>(),
            codec.encode(&"hello").unwrap(),
        );

        let bytes = codec.encode(&envelope).unwrap();
        let back: Envelope<ProbeTag> = codec.decode(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn payload_free_envelope_round_trips() {
        let codec = JsonCodec;
        let envelope = Envelope::new(ProbeTag::Pong);
        assert!(envelope.content.is_empty());
        assert!(envelope.payload_type.is_none());

        let bytes = codec.encode(&envelope).unwrap();
        let back: Envelope<ProbeTag> = codec.decode(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn reply_mirrors_tag_and_correlates_by_id() {
        let request = Envelope::with_payload(
            ProbeTag::Ping,
            PayloadType::of::<String>(),
            b"{}".to_vec(),
        );
        let reply = Envelope::reply_to(&request, PayloadType::of::<u32>(), b"7".to_vec());

        assert_eq!(reply.message_type, request.message_type);
        assert_eq!(reply.response_to, Some(request.id));
        assert_ne!(reply.id, request.id);
        assert!(reply.is_reply());
        assert!(!request.is_reply());
    }

    #[test]
    fn unit_tag_gives_single_tag_mode() {
        let envelope = Envelope::with_payload((), PayloadType::of::<u8>(), vec![1]);
        let codec = JsonCodec;
        let bytes = codec.encode(&envelope).unwrap();
        let back: Envelope<()> = codec.decode(&bytes).unwrap();
        assert_eq!(back, envelope);
    }
}
