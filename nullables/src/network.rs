//! A dev-network channel registry for tests that never open sockets.

use std::sync::Arc;

use lattice_network::{ConnectionLimits, Network};
use lattice_types::NetworkConstants;
use lattice_utils::Stats;

pub fn dev_network(stats: Arc<Stats>) -> Arc<Network> {
    let constants = NetworkConstants::dev();
    let limits = ConnectionLimits {
        max_inbound: 128,
        max_peers_per_ip: constants.max_peers_per_ip,
        max_peers_per_subnetwork: constants.max_peers_per_subnetwork,
        allow_local_peers: true,
    };
    Arc::new(Network::new(constants, limits, stats))
}
