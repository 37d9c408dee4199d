//! `lat_` account addresses.
//!
//! The 60 characters after the prefix carry 300 bits: four zero bits, the
//! 256-bit public key, then a 40-bit Blake2b checksum of the key stored in
//! reverse byte order. Each character encodes five bits.

use blake2::digest::consts::U5;
use blake2::{Blake2b, Digest};
use lattice_types::{Account, TypesError};

const PREFIX: &str = "lat_";
const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
const CHARS: usize = 60;
const PAD_BITS: usize = 4;
/// Key followed by the reversed checksum.
const PAYLOAD: usize = 32 + 5;

fn checksum(account: &[u8; 32]) -> [u8; 5] {
    let mut out = [0u8; 5];
    out.copy_from_slice(&Blake2b::<U5>::digest(account));
    out.reverse();
    out
}

fn symbol_value(symbol: u8) -> Option<u8> {
    ALPHABET.iter().position(|&c| c == symbol).map(|i| i as u8)
}

fn bit(payload: &[u8; PAYLOAD], index: usize) -> u8 {
    if index < PAD_BITS {
        return 0;
    }
    let index = index - PAD_BITS;
    (payload[index / 8] >> (7 - index % 8)) & 1
}

pub fn encode_account(account: &Account) -> String {
    let key = account.as_bytes();
    let mut payload = [0u8; PAYLOAD];
    payload[..32].copy_from_slice(key);
    payload[32..].copy_from_slice(&checksum(key));

    let mut address = String::with_capacity(PREFIX.len() + CHARS);
    address.push_str(PREFIX);
    for symbol in 0..CHARS {
        let value = (0..5).fold(0u8, |acc, b| (acc << 1) | bit(&payload, symbol * 5 + b));
        address.push(ALPHABET[value as usize] as char);
    }
    address
}

/// Parse a `lat_` address. Fails on a wrong prefix, length, alphabet,
/// non-zero padding or checksum.
pub fn decode_account(address: &str) -> Result<Account, TypesError> {
    let invalid = || TypesError::InvalidAccount(address.to_string());
    let encoded = address.strip_prefix(PREFIX).ok_or_else(invalid)?;
    if encoded.len() != CHARS {
        return Err(invalid());
    }

    let mut payload = [0u8; PAYLOAD];
    for (symbol, c) in encoded.bytes().enumerate() {
        let value = symbol_value(c).ok_or_else(invalid)?;
        for b in 0..5 {
            let index = symbol * 5 + b;
            let set = (value >> (4 - b)) & 1 == 1;
            if index < PAD_BITS {
                if set {
                    return Err(invalid());
                }
                continue;
            }
            if set {
                let index = index - PAD_BITS;
                payload[index / 8] |= 0x80 >> (index % 8);
            }
        }
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&payload[..32]);
    if payload[32..] != checksum(&key) {
        return Err(invalid());
    }
    Ok(Account::new(key))
}

pub fn validate_account(address: &str) -> bool {
    decode_account(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_keypair;

    #[test]
    fn encoded_address_decodes_to_the_same_key() {
        let account = generate_keypair().account();
        let address = encode_account(&account);
        assert!(address.starts_with("lat_"));
        assert_eq!(address.len(), 64);
        assert_eq!(decode_account(&address).unwrap(), account);
    }

    #[test]
    fn zero_key_starts_with_padding_symbol() {
        let address = encode_account(&Account::new([0; 32]));
        assert!(address["lat_".len()..].starts_with(&"1".repeat(52)));
    }

    #[test]
    fn rejects_malformed_addresses() {
        let address = encode_account(&Account::new([3; 32]));
        assert!(!validate_account(&address.replacen("lat_", "xyz_", 1)));
        assert!(!validate_account("lat_tooshort"));
        assert!(!validate_account("lat_"));
        // '0' and 'l' are outside the alphabet
        assert!(!validate_account(&address.replacen('1', "0", 1)));
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut bad = encode_account(&generate_keypair().account());
        let last = bad.pop().unwrap();
        bad.push(if last == '1' { '3' } else { '1' });
        assert!(matches!(decode_account(&bad), Err(TypesError::InvalidAccount(_))));
    }

    #[test]
    fn rejects_non_zero_padding() {
        let address = encode_account(&Account::new([0; 32]));
        // 'z' sets all five leading bits, four of which are padding.
        let padded = format!("lat_z{}", &address["lat_1".len()..]);
        assert!(!validate_account(&padded));
    }
}
