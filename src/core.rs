use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Atomic reference-counted string type used for identifiers.
pub type ArcStr = std::sync::Arc<str>;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// Every identity the engine deals with (task signatures, unified identities
/// handed out by the equivalence service, output identities reported by
/// executors) is one of these underneath. The typed wrappers below keep the
/// identity spaces apart.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    pub fn from_hex(text: &str) -> Option<Self> {
        let text = text.as_bytes();
        if text.len() != 64 {
            return None;
        }

        let mut out = [0u8; 32];
        for (i, pair) in text.chunks_exact(2).enumerate() {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            out[i] = (hi << 4 | lo) as u8;
        }

        Some(Hash32(out))
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a 64 character hex digest")]
pub struct HexError(pub String);

impl FromStr for Hash32 {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash32::from_hex(s).ok_or_else(|| HexError(s.to_string()))
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental builder for [`Hash32`] values.
///
/// Fields are length-prefixed so that `("ab", "c")` and `("a", "bc")` never
/// collide.
#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl Blake3Hasher {
    pub(crate) fn field(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        let bytes = bytes.as_ref();
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }
}

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

macro_rules! identity {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Hash32);

        impl $name {
            pub fn to_hex(self) -> String {
                self.0.to_hex()
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.to_hex())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = HexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map($name)
            }
        }
    };
}

identity! {
    /// Content signature of a task, derived from its static inputs and the
    /// signatures of its dependencies. Computed once per run.
    Signature
}

identity! {
    /// Canonical identity shared by all signatures whose outputs are known
    /// to be interchangeable. Artifacts are stored under this identity.
    UnifiedId
}

identity! {
    /// Identity of the output a real execution produced.
    OutputId
}

impl From<Signature> for UnifiedId {
    /// A signature nobody has unified yet stands for itself.
    fn from(value: Signature) -> Self {
        UnifiedId(value.0)
    }
}

/// Strips the conventional `do_` prefix from a task name.
pub(crate) fn task_name(name: &str) -> &str {
    name.strip_prefix("do_").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hash = Hash32::hash(b"a1:do_package");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Hash32::from_hex(&hex), Some(hash));
    }

    #[test]
    fn test_hex_rejects_garbage() {
        assert_eq!(Hash32::from_hex("abc"), None);
        assert_eq!(Hash32::from_hex(&"zz".repeat(32)), None);
        assert!("nope".parse::<Signature>().is_err());
    }

    #[test]
    fn test_fields_are_length_prefixed() {
        let mut a = Blake3Hasher::default();
        a.field("ab").field("c");
        let mut b = Blake3Hasher::default();
        b.field("a").field("bc");
        assert_ne!(Hash32::from(a), Hash32::from(b));
    }

    #[test]
    fn test_task_name() {
        assert_eq!(task_name("do_package"), "package");
        assert_eq!(task_name("package"), "package");
    }

    #[test]
    fn test_identity_serde() {
        let sig = Signature(Hash32::hash("x"));
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json, format!("\"{}\"", sig.to_hex()));
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
