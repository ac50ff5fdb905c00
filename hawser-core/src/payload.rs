//! Payload-type descriptors.
//!
//! Handler dispatch matches the descriptor carried in an envelope against the
//! descriptor a handler registered with, by plain value equality. No runtime
//! reflection is involved: the descriptor is an explicit string travelling on
//! the wire.

use serde::{Deserialize, Serialize};

/// Descriptor for the schema of an envelope's `content` bytes.
///
/// The default descriptor for a Rust type is its unqualified name with module
/// paths stripped (`my_app::messages::Ping` becomes `Ping`, and
/// `Vec<alloc::string::String>` becomes `Vec<String>`), so the same payload
/// type matches across crates and re-export paths. When the two sides of a
/// connection name a type differently, register and send with an explicit
/// descriptor via [`PayloadType::new`].
///
/// # Examples
///
/// ```
/// use hawser_core::PayloadType;
///
/// assert_eq!(PayloadType::of::<String>(), PayloadType::new("String"));
/// assert_eq!(PayloadType::of::<Vec<u8>>(), PayloadType::new("Vec<u8>"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadType(String);

impl PayloadType {
    /// Create a descriptor from an explicit name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Descriptor for a Rust type: its name with module paths stripped.
    pub fn of<T: ?Sized>() -> Self {
        Self(strip_paths(std::any::type_name::<T>()))
    }

    /// The descriptor text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drop `path::to::` prefixes from a type name, keeping generic structure.
fn strip_paths(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for ch in full.chars() {
        match ch {
            // A colon ends a path segment; whatever was accumulated was a
            // module name, not the type itself.
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                out.push_str(&segment);
                segment.clear();
                out.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    out.push_str(&segment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    #[test]
    fn strips_module_paths() {
        assert_eq!(PayloadType::of::<Plain>().as_str(), "Plain");
        assert_eq!(PayloadType::of::<String>().as_str(), "String");
    }

    #[test]
    fn keeps_generic_structure() {
        assert_eq!(PayloadType::of::<Vec<String>>().as_str(), "Vec<String>");
        assert_eq!(
            PayloadType::of::<Option<Vec<u8>>>().as_str(),
            "Option<Vec<u8>>"
        );
    }

    #[test]
    fn handles_tuples_and_references() {
        assert_eq!(PayloadType::of::<(u32, String)>().as_str(), "(u32, String)");
        assert_eq!(PayloadType::of::<&str>().as_str(), "&str");
    }

    #[test]
    fn explicit_names_compare_by_value() {
        assert_eq!(PayloadType::new("Ping"), PayloadType::new("Ping"));
        assert_ne!(PayloadType::new("Ping"), PayloadType::new("Pong"));
    }

    #[test]
    fn serde_round_trip() {
        let ty = PayloadType::of::<Vec<String>>();
        let json = serde_json::to_string(&ty).expect("serialize");
        let back: PayloadType = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ty, back);
    }
}
