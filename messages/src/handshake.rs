use lattice_types::{Account, Signature};
use serde::{Deserialize, Serialize};

/// Node identity exchange.
///
/// A connection starts with a query carrying a random cookie. The peer
/// answers with its node id and a signature over that cookie, and may
/// include its own query in the same message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdHandshake {
    pub query: Option<[u8; 32]>,
    pub response: Option<NodeIdHandshakeResponse>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdHandshakeResponse {
    pub node_id: Account,
    pub signature: Signature,
}

impl NodeIdHandshake {
    pub fn query(cookie: [u8; 32]) -> Self {
        Self {
            query: Some(cookie),
            response: None,
        }
    }

    pub fn response(response: NodeIdHandshakeResponse, query: Option<[u8; 32]>) -> Self {
        Self {
            query,
            response: Some(response),
        }
    }
}
