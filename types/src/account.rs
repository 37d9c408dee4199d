//! Account identifiers.
//!
//! An account is the Ed25519 public key of its owner. The human readable
//! `lat_…` encoding lives in `lattice_crypto::address`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::{HashOrAccount, Link, Root};
use crate::keys::PublicKey;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Account([u8; 32]);

impl Account {
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

    /// The successor in key order, used to resume ordered table scans.
    ///
    /// Wraps to zero after the maximum account.
    pub fn next(&self) -> Account {
        let mut bytes = self.0;
        for b in bytes.iter_mut().rev() {
            let (v, overflow) = b.overflowing_add(1);
            *b = v;
            if !overflow {
                break;
            }
        }
        Account(bytes)
    }
}

impl From<PublicKey> for Account {
    fn from(key: PublicKey) -> Self {
        Account(key.0)
    }
}

impl From<&PublicKey> for Account {
    fn from(key: &PublicKey) -> Self {
        Account(key.0)
    }
}

impl From<Account> for Link {
    fn from(account: Account) -> Self {
        Link::new(account.0)
    }
}

impl From<Link> for Account {
    fn from(link: Link) -> Self {
        Account(*link.as_bytes())
    }
}

impl From<Account> for Root {
    fn from(account: Account) -> Self {
        Root::new(account.0)
    }
}

impl From<Account> for HashOrAccount {
    fn from(account: Account) -> Self {
        HashOrAccount::new(account.0)
    }
}

impl From<HashOrAccount> for Account {
    fn from(value: HashOrAccount) -> Self {
        Account(*value.as_bytes())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "…)")
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments_last_byte() {
        let a = Account::new([0; 32]);
        let mut expected = [0u8; 32];
        expected[31] = 1;
        assert_eq!(a.next(), Account::new(expected));
    }

    #[test]
    fn next_carries() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xff;
        let mut expected = [0u8; 32];
        expected[30] = 1;
        assert_eq!(Account::new(bytes).next(), Account::new(expected));
    }

    #[test]
    fn next_of_max_wraps_to_zero() {
        assert_eq!(Account::new([0xff; 32]).next(), Account::ZERO);
    }

    #[test]
    fn public_key_conversion_keeps_bytes() {
        let key = PublicKey([7; 32]);
        let account = Account::from(key);
        assert_eq!(PublicKey::from(account), key);
    }
}
