//! 256-bit hash-like values: block hashes, roots, links.
//!
//! All of them are plain 32-byte arrays. They differ only in meaning, so the
//! shared behaviour is generated by [`u256_struct!`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TypesError;

macro_rules! u256_struct {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            /// Parse a 64-character hex string.
            pub fn decode_hex(s: &str) -> Result<Self, TypesError> {
                let bytes = hex::decode(s)?;
                Ok(Self(bytes))
            }

            pub fn encode_hex(&self) -> String {
                hex::encode(&self.0)
            }

            /// Interpret the low 8 bytes as a little-endian number.
            ///
            /// Used for cheap sharding and sampling where a full hash comparison
            /// would be wasteful.
            pub fn low_u64(&self) -> u64 {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&self.0[24..32]);
                u64::from_le_bytes(buf)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}…)", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(&self.0))
            }
        }
    };
}

u256_struct!(BlockHash);
u256_struct!(Root);
u256_struct!(Link);
u256_struct!(HashOrAccount);

impl From<BlockHash> for Root {
    fn from(hash: BlockHash) -> Self {
        Root(hash.0)
    }
}

impl From<BlockHash> for Link {
    fn from(hash: BlockHash) -> Self {
        Link(hash.0)
    }
}

impl From<Link> for BlockHash {
    fn from(link: Link) -> Self {
        BlockHash(link.0)
    }
}

impl From<BlockHash> for HashOrAccount {
    fn from(hash: BlockHash) -> Self {
        HashOrAccount(hash.0)
    }
}

impl From<HashOrAccount> for BlockHash {
    fn from(value: HashOrAccount) -> Self {
        BlockHash(value.0)
    }
}

impl From<Root> for BlockHash {
    fn from(root: Root) -> Self {
        BlockHash(root.0)
    }
}

/// Root plus previous: uniquely identifies one slot in an account chain.
///
/// Two blocks with the same qualified root are forks of each other.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedRoot {
    pub root: Root,
    pub previous: BlockHash,
}

impl QualifiedRoot {
    pub fn new(root: Root, previous: BlockHash) -> Self {
        Self { root, previous }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.root.as_bytes());
        out[32..].copy_from_slice(self.previous.as_bytes());
        out
    }
}

impl fmt::Debug for QualifiedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QualifiedRoot({:?}, {:?})", self.root, self.previous)
    }
}

impl fmt::Display for QualifiedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.root, self.previous)
    }
}

// Inline hex encoding to avoid adding the `hex` crate as a dependency of types.
mod hex {
    use crate::error::TypesError;

    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn decode(s: &str) -> Result<[u8; 32], TypesError> {
        if s.len() != 64 {
            return Err(TypesError::InvalidHex(s.to_string()));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| TypesError::InvalidHex(s.to_string()))?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let hash = BlockHash::new([0xAB; 32]);
        let decoded = BlockHash::decode_hex(&hash.encode_hex()).unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn decode_rejects_short_input() {
        assert!(BlockHash::decode_hex("abcd").is_err());
    }

    #[test]
    fn decode_rejects_non_hex() {
        let s = "zz".repeat(32);
        assert!(Root::decode_hex(&s).is_err());
    }

    #[test]
    fn debug_is_abbreviated() {
        let hash = BlockHash::new([0x12; 32]);
        assert_eq!(format!("{:?}", hash), "BlockHash(12121212…)");
    }

    #[test]
    fn qualified_roots_of_forks_are_equal() {
        let root = Root::new([1; 32]);
        let previous = BlockHash::new([2; 32]);
        assert_eq!(
            QualifiedRoot::new(root, previous),
            QualifiedRoot::new(root, previous)
        );
        assert_ne!(
            QualifiedRoot::new(root, previous),
            QualifiedRoot::new(root, BlockHash::ZERO)
        );
    }
}
