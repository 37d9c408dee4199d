//! Signed node statistics exchanged between peers.
//!
//! Every node answers a telemetry_req with a telemetry_ack signed by its node
//! id. Replies from peers are verified and cached per channel until the
//! network's telemetry cutoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lattice_crypto::{sign_message, verify_signature};
use lattice_ledger::Ledger;
use lattice_messages::{Message, TelemetryData};
use lattice_network::{Channel, ChannelId, DropPolicy, Network, TrafficType};
use lattice_protocol::PROTOCOL_VERSION;
use lattice_types::{KeyPair, PublicKey};
use lattice_utils::{DetailType, Direction, StatType, Stats};

use crate::unchecked::UncheckedMap;

struct Entry {
    received: Instant,
    data: TelemetryData,
}

pub struct Telemetry {
    node_key: Arc<KeyPair>,
    ledger: Arc<Ledger>,
    network: Arc<Network>,
    unchecked: Arc<UncheckedMap>,
    stats: Arc<Stats>,
    started: Instant,
    cache_cutoff: Duration,
    cache: Mutex<HashMap<ChannelId, Entry>>,
}

fn version_part(text: &str) -> u8 {
    text.parse().unwrap_or_default()
}

impl Telemetry {
    pub fn new(
        node_key: Arc<KeyPair>,
        ledger: Arc<Ledger>,
        network: Arc<Network>,
        unchecked: Arc<UncheckedMap>,
        stats: Arc<Stats>,
    ) -> Self {
        let cache_cutoff = network.constants.telemetry_cache_cutoff;
        Self {
            node_key,
            ledger,
            network,
            unchecked,
            stats,
            started: Instant::now(),
            cache_cutoff,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// This node's current statistics, signed.
    pub fn local_telemetry(&self) -> TelemetryData {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let mut data = TelemetryData {
            node_id: self.node_key.account(),
            block_count: self.ledger.block_count(),
            cemented_count: self.ledger.cemented_count(),
            unchecked_count: self.unchecked.len() as u64,
            account_count: self.ledger.account_count(),
            peer_count: self.network.count() as u32,
            protocol_version: PROTOCOL_VERSION,
            uptime: self.started.elapsed().as_secs(),
            genesis_block: self.ledger.constants.genesis.hash(),
            major_version: version_part(env!("CARGO_PKG_VERSION_MAJOR")),
            minor_version: version_part(env!("CARGO_PKG_VERSION_MINOR")),
            patch_version: version_part(env!("CARGO_PKG_VERSION_PATCH")),
            timestamp,
            ..TelemetryData::default()
        };
        data.signature = sign_message(&data.signed_bytes(), &self.node_key.private);
        data
    }

    pub fn process_request(&self, channel: &dyn Channel) {
        let reply = Message::TelemetryAck(self.local_telemetry());
        if channel.send(&reply, DropPolicy::CanDrop, TrafficType::Generic) {
            self.stats
                .inc_dir(StatType::Telemetry, DetailType::TelemetryAck, Direction::Out);
        }
    }

    /// Verify and cache a peer's reply. Returns false if it was rejected.
    pub fn process_ack(&self, data: TelemetryData, channel: &dyn Channel) -> bool {
        self.stats
            .inc_dir(StatType::Telemetry, DetailType::TelemetryAck, Direction::In);
        if let Some(node_id) = channel.node_id() {
            if node_id != data.node_id {
                self.stats.inc(StatType::Telemetry, DetailType::Invalid);
                tracing::debug!(peer = %channel.remote_endpoint(), "telemetry node id does not match the channel");
                return false;
            }
        }
        if data.genesis_block != self.ledger.constants.genesis.hash() {
            self.stats.inc(StatType::Telemetry, DetailType::Invalid);
            tracing::debug!(peer = %channel.remote_endpoint(), "telemetry from another genesis");
            return false;
        }
        if !verify_signature(&data.signed_bytes(), &data.signature, &PublicKey::from(data.node_id)) {
            self.stats.inc(StatType::Telemetry, DetailType::BadSignature);
            return false;
        }
        self.cache.lock().unwrap().insert(
            channel.channel_id(),
            Entry {
                received: Instant::now(),
                data,
            },
        );
        true
    }

    /// Ask every realtime peer for fresh telemetry.
    pub fn request_all(&self) {
        for channel in self.network.list(0) {
            if channel.send(&Message::TelemetryReq, DropPolicy::CanDrop, TrafficType::Generic) {
                self.stats
                    .inc_dir(StatType::Telemetry, DetailType::TelemetryReq, Direction::Out);
            }
        }
    }

    pub fn get(&self, channel: ChannelId) -> Option<TelemetryData> {
        let cache = self.cache.lock().unwrap();
        cache
            .get(&channel)
            .filter(|entry| entry.received.elapsed() <= self.cache_cutoff)
            .map(|entry| entry.data.clone())
    }

    pub fn all(&self) -> Vec<(ChannelId, TelemetryData)> {
        let cache = self.cache.lock().unwrap();
        cache
            .iter()
            .filter(|(_, entry)| entry.received.elapsed() <= self.cache_cutoff)
            .map(|(id, entry)| (*id, entry.data.clone()))
            .collect()
    }

    /// Drop expired entries and entries of closed channels.
    pub fn cleanup(&self, now: Instant) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|id, entry| {
            now.saturating_duration_since(entry.received) <= self.cache_cutoff
                && self.network.find(*id).is_some()
        });
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
