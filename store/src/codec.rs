//! Key and value encodings.
//!
//! Keys are fixed-width big-endian byte strings so that engine order matches
//! the natural order of the key type. Values are bincode.

use lattice_types::{Account, BlockHash, PendingKey, QualifiedRoot, Root};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::{Ipv6Addr, SocketAddrV6};

use crate::engine::Table;

pub trait DbKey: Sized {
    fn to_key(&self) -> Vec<u8>;
    fn from_key(bytes: &[u8]) -> Option<Self>;
}

fn array32(bytes: &[u8]) -> Option<[u8; 32]> {
    bytes.try_into().ok()
}

impl DbKey for Account {
    fn to_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_key(bytes: &[u8]) -> Option<Self> {
        array32(bytes).map(Account::new)
    }
}

impl DbKey for BlockHash {
    fn to_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_key(bytes: &[u8]) -> Option<Self> {
        array32(bytes).map(BlockHash::new)
    }
}

impl DbKey for PendingKey {
    fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(self.receiving_account.as_bytes());
        key.extend_from_slice(self.send_block_hash.as_bytes());
        key
    }

    fn from_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        Some(PendingKey::new(
            Account::new(array32(&bytes[..32])?),
            BlockHash::new(array32(&bytes[32..])?),
        ))
    }
}

impl DbKey for QualifiedRoot {
    fn to_key(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }

    fn from_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        Some(QualifiedRoot::new(
            Root::new(array32(&bytes[..32])?),
            BlockHash::new(array32(&bytes[32..])?),
        ))
    }
}

impl DbKey for u64 {
    fn to_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_key(bytes: &[u8]) -> Option<Self> {
        Some(u64::from_be_bytes(bytes.try_into().ok()?))
    }
}

impl DbKey for SocketAddrV6 {
    fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(18);
        key.extend_from_slice(&self.ip().octets());
        key.extend_from_slice(&self.port().to_be_bytes());
        key
    }

    fn from_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 18 {
            return None;
        }
        let ip: [u8; 16] = bytes[..16].try_into().ok()?;
        let port = u16::from_be_bytes([bytes[16], bytes[17]]);
        Some(SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, 0))
    }
}

pub(crate) fn encode_value<V: Serialize>(value: &V) -> Vec<u8> {
    // Serializing plain data structs into a Vec cannot fail.
    bincode::serialize(value).unwrap_or_default()
}

pub(crate) fn decode_value<V: DeserializeOwned>(table: Table, bytes: &[u8]) -> Option<V> {
    match bincode::deserialize(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(table = table.as_str(), error = %e, "undecodable value");
            None
        }
    }
}
