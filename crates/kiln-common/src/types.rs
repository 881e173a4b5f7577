//! Key datatype tags for KilnDB indexes.

use serde::{Deserialize, Serialize};

/// Datatype of an indexed attribute.
///
/// The tag is persisted in the index meta page, so the numeric values are
/// part of the on-disk format. Only [`KeyType::Int`] keys are implemented;
/// the other tags reserve space in the format for future key kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// 32-bit signed integer key.
    Int,
    /// 64-bit floating point key (reserved).
    Double,
    /// Variable-length string key (reserved).
    Text,
}

impl KeyType {
    /// Returns the on-disk tag for this key type.
    pub fn tag(&self) -> i32 {
        match self {
            KeyType::Int => 0,
            KeyType::Double => 1,
            KeyType::Text => 2,
        }
    }

    /// Decodes a key type from its on-disk tag.
    pub fn from_tag(tag: i32) -> Option<KeyType> {
        match tag {
            0 => Some(KeyType::Int),
            1 => Some(KeyType::Double),
            2 => Some(KeyType::Text),
            _ => None,
        }
    }

    /// Returns the fixed byte width of key values of this type, or None for
    /// variable-length keys.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            KeyType::Int => Some(4),
            KeyType::Double => Some(8),
            KeyType::Text => None,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeyType::Int => "INT",
            KeyType::Double => "DOUBLE",
            KeyType::Text => "TEXT",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for kt in [KeyType::Int, KeyType::Double, KeyType::Text] {
            assert_eq!(KeyType::from_tag(kt.tag()), Some(kt));
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(KeyType::from_tag(3), None);
        assert_eq!(KeyType::from_tag(-1), None);
    }

    #[test]
    fn test_fixed_size() {
        assert_eq!(KeyType::Int.fixed_size(), Some(4));
        assert_eq!(KeyType::Double.fixed_size(), Some(8));
        assert_eq!(KeyType::Text.fixed_size(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyType::Int.to_string(), "INT");
        assert_eq!(KeyType::Double.to_string(), "DOUBLE");
        assert_eq!(KeyType::Text.to_string(), "TEXT");
    }

    #[test]
    fn test_serde_roundtrip() {
        for kt in [KeyType::Int, KeyType::Double, KeyType::Text] {
            let json = serde_json::to_string(&kt).unwrap();
            let back: KeyType = serde_json::from_str(&json).unwrap();
            assert_eq!(kt, back);
        }
    }
}
