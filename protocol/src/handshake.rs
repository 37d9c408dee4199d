//! Node-id handshake: proving ownership of a node id by signing a cookie.

use lattice_crypto::{sign_message, verify_signature};
use lattice_messages::NodeIdHandshakeResponse;
use lattice_types::KeyPair;

/// Answer a peer's query.
pub fn sign_cookie(cookie: &[u8; 32], node_key: &KeyPair) -> NodeIdHandshakeResponse {
    NodeIdHandshakeResponse {
        node_id: node_key.account(),
        signature: sign_message(cookie, &node_key.private),
    }
}

/// Whether `response` proves ownership of its node id for `cookie`.
pub fn verify_handshake_response(cookie: &[u8; 32], response: &NodeIdHandshakeResponse) -> bool {
    verify_signature(cookie, &response.signature, &response.node_id.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crypto::generate_keypair;

    #[test]
    fn signed_cookie_verifies() {
        let key = generate_keypair();
        let cookie = [7; 32];
        let response = sign_cookie(&cookie, &key);
        assert_eq!(response.node_id, key.account());
        assert!(verify_handshake_response(&cookie, &response));
        assert!(!verify_handshake_response(&[8; 32], &response));
    }

    #[test]
    fn claimed_identity_must_match_signer() {
        let key = generate_keypair();
        let other = generate_keypair();
        let mut response = sign_cookie(&[1; 32], &key);
        response.node_id = other.account();
        assert!(!verify_handshake_response(&[1; 32], &response));
    }
}
