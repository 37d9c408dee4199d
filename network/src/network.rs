//! Registry of live peer channels.

use std::collections::HashMap;
use std::net::SocketAddrV6;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lattice_messages::{Keepalive, Message};
use lattice_types::{Account, NetworkConstants};
use lattice_utils::{DetailType, Direction as StatDirection, StatType, Stats};
use rand::seq::SliceRandom;

use crate::channel::{Channel, ChannelId, ChannelMode, DropPolicy, TrafficType};
use crate::limits::{ConnectionLimits, Direction};
use crate::network_filter::NetworkFilter;
use crate::peer_exclusion::PeerExclusion;
use crate::syn_cookies::SynCookies;

const MAX_EXCLUDED_PEERS: usize = 5000;

struct Entry {
    channel: Arc<dyn Channel>,
    direction: Direction,
}

/// All channels the node currently holds, plus the shared peer-level
/// bookkeeping: handshake cookies, exclusion scores and the duplicate filter.
pub struct Network {
    pub constants: NetworkConstants,
    pub limits: ConnectionLimits,
    pub filter: NetworkFilter,
    pub syn_cookies: Mutex<SynCookies>,
    pub excluded_peers: Mutex<PeerExclusion>,
    stats: Arc<Stats>,
    channels: Mutex<HashMap<ChannelId, Entry>>,
    next_channel_id: AtomicUsize,
}

impl Network {
    pub fn new(constants: NetworkConstants, limits: ConnectionLimits, stats: Arc<Stats>) -> Self {
        let max_cookies_per_ip = constants.max_peers_per_ip;
        Self {
            constants,
            limits,
            filter: NetworkFilter::default(),
            syn_cookies: Mutex::new(SynCookies::new(max_cookies_per_ip)),
            excluded_peers: Mutex::new(PeerExclusion::new(MAX_EXCLUDED_PEERS)),
            stats,
            channels: Mutex::new(HashMap::new()),
            next_channel_id: AtomicUsize::new(1),
        }
    }

    pub fn next_channel_id(&self) -> ChannelId {
        ChannelId(self.next_channel_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether a new connection to or from `endpoint` would be accepted.
    pub fn check_limits(&self, endpoint: &SocketAddrV6, direction: Direction) -> Result<(), &'static str> {
        if self.is_excluded(endpoint) {
            let dir = match direction {
                Direction::Inbound => StatDirection::In,
                Direction::Outbound => StatDirection::Out,
            };
            self.stats.inc_dir(StatType::Tcp, DetailType::Excluded, dir);
            return Err("peer is excluded");
        }
        let channels = self.channels.lock().unwrap();
        let existing: Vec<(SocketAddrV6, Direction)> = channels
            .values()
            .filter(|e| e.channel.is_alive())
            .map(|e| (e.channel.remote_endpoint(), e.direction))
            .collect();
        drop(channels);
        self.limits
            .check(endpoint, direction, existing.iter().map(|(e, d)| (e, *d)), &self.stats)
    }

    /// Register an authenticated channel.
    ///
    /// Refused when another live channel already belongs to the same node id.
    pub fn add(&self, channel: Arc<dyn Channel>, direction: Direction) -> bool {
        let mut channels = self.channels.lock().unwrap();
        if let Some(node_id) = channel.node_id() {
            let duplicate = channels.values().any(|e| {
                e.channel.is_alive() && e.channel.node_id() == Some(node_id)
            });
            if duplicate {
                drop(channels);
                self.stats.inc(StatType::Tcp, DetailType::Duplicate);
                return false;
            }
        }
        tracing::debug!(
            channel = %channel.channel_id(),
            peer = %channel.remote_endpoint(),
            ?direction,
            "channel added"
        );
        channels.insert(channel.channel_id(), Entry { channel, direction });
        true
    }

    pub fn remove(&self, id: ChannelId) -> Option<Arc<dyn Channel>> {
        self.channels.lock().unwrap().remove(&id).map(|e| e.channel)
    }

    pub fn find(&self, id: ChannelId) -> Option<Arc<dyn Channel>> {
        self.channels.lock().unwrap().get(&id).map(|e| Arc::clone(&e.channel))
    }

    pub fn find_endpoint(&self, endpoint: &SocketAddrV6) -> Option<Arc<dyn Channel>> {
        self.channels
            .lock()
            .unwrap()
            .values()
            .find(|e| e.channel.is_alive() && e.channel.remote_endpoint() == *endpoint)
            .map(|e| Arc::clone(&e.channel))
    }

    pub fn find_node_id(&self, node_id: &Account) -> Option<Arc<dyn Channel>> {
        self.channels
            .lock()
            .unwrap()
            .values()
            .find(|e| e.channel.is_alive() && e.channel.node_id() == Some(*node_id))
            .map(|e| Arc::clone(&e.channel))
    }

    /// Live realtime channels speaking at least `min_version`.
    pub fn list(&self, min_version: u8) -> Vec<Arc<dyn Channel>> {
        self.channels
            .lock()
            .unwrap()
            .values()
            .filter(|e| {
                e.channel.is_alive()
                    && e.channel.mode() == ChannelMode::Realtime
                    && e.channel.protocol_version() >= min_version
            })
            .map(|e| Arc::clone(&e.channel))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.list(0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Number of peers a flood reaches: `ceil(scale * sqrt(peers))`.
    pub fn fanout(&self, scale: f32) -> usize {
        (scale * (self.count() as f32).sqrt()).ceil() as usize
    }

    pub fn random_channels(&self, count: usize) -> Vec<Arc<dyn Channel>> {
        let mut channels = self.list(0);
        channels.shuffle(&mut rand::thread_rng());
        channels.truncate(count);
        channels
    }

    pub fn random_fanout(&self, scale: f32) -> Vec<Arc<dyn Channel>> {
        self.random_channels(self.fanout(scale))
    }

    /// Send `message` to a random square-root subset of peers. Returns the
    /// number of channels that accepted it.
    pub fn flood(&self, message: &Message, drop_policy: DropPolicy, scale: f32) -> usize {
        self.random_fanout(scale)
            .iter()
            .filter(|channel| channel.send(message, drop_policy, TrafficType::Generic))
            .count()
    }

    /// A keepalive listing up to eight random peers.
    pub fn random_keepalive(&self) -> Keepalive {
        let peers = self
            .random_channels(Keepalive::PEER_SLOTS)
            .into_iter()
            .map(|c| c.remote_endpoint());
        Keepalive::new(peers)
    }

    /// Send keepalives to channels that have been quiet for a keepalive period.
    pub fn keepalive(&self) {
        let cutoff = Instant::now()
            .checked_sub(self.constants.keepalive_period)
            .unwrap_or_else(Instant::now);
        let message = Message::Keepalive(self.random_keepalive());
        for channel in self.list(0) {
            if channel.last_packet_sent() < cutoff {
                channel.send(&message, DropPolicy::CanDrop, TrafficType::Generic);
                self.stats.inc_dir(StatType::Keepalive, DetailType::Keepalive, StatDirection::Out);
            }
        }
    }

    /// Close idle and silent channels and drop dead ones from the registry.
    pub fn purge(&self) {
        self.purge_at(Instant::now());
    }

    pub fn purge_at(&self, now: Instant) {
        let idle = self.constants.idle_timeout;
        let silent = self.constants.silent_connection_tolerance_time;
        let mut channels = self.channels.lock().unwrap();
        for entry in channels.values() {
            let channel = &entry.channel;
            if !channel.is_alive() {
                continue;
            }
            let since_received = elapsed(now, channel.last_packet_received());
            let since_sent = elapsed(now, channel.last_packet_sent());
            if since_received > idle && since_sent > idle {
                self.stats.inc(StatType::Tcp, DetailType::IdleTimeout);
                channel.close();
            } else if since_received > silent {
                self.stats.inc(StatType::Tcp, DetailType::SilentTimeout);
                channel.close();
            }
        }
        channels.retain(|_, e| e.channel.is_alive());
        drop(channels);

        self.syn_cookies
            .lock()
            .unwrap()
            .purge(self.constants.syn_cookie_cutoff);
        self.excluded_peers.lock().unwrap().purge();
    }

    /// Penalise a misbehaving peer and close its channel once excluded.
    pub fn exclude(&self, channel: &dyn Channel) {
        let endpoint = channel.remote_endpoint();
        let mut excluded = self.excluded_peers.lock().unwrap();
        excluded.add(&endpoint);
        if excluded.is_excluded(&endpoint) {
            drop(excluded);
            self.stats.inc(StatType::PeerExclusion, DetailType::Excluded);
            tracing::info!(peer = %endpoint, "excluding misbehaving peer");
            channel.close();
        }
    }

    pub fn is_excluded(&self, endpoint: &SocketAddrV6) -> bool {
        self.excluded_peers.lock().unwrap().is_excluded(endpoint)
    }

    pub fn close_all(&self) {
        for (_, entry) in self.channels.lock().unwrap().drain() {
            entry.channel.close();
        }
    }
}

fn elapsed(now: Instant, then: Instant) -> Duration {
    now.saturating_duration_since(then)
}
