//! Nullable channel: records what is sent instead of writing to a socket.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lattice_messages::Message;
use lattice_network::{Channel, ChannelId, ChannelMode, DropPolicy, TrafficType};
use lattice_protocol::PROTOCOL_VERSION;
use lattice_types::Account;

pub struct NullChannel {
    id: ChannelId,
    endpoint: SocketAddrV6,
    alive: AtomicBool,
    full: AtomicBool,
    node_id: Mutex<Option<Account>>,
    mode: Mutex<ChannelMode>,
    last_received: Mutex<Instant>,
    last_sent: Mutex<Instant>,
    sent: Mutex<Vec<Message>>,
}

impl NullChannel {
    /// A live realtime channel to `[fd00::id]:7075`.
    pub fn new(id: usize) -> Arc<Self> {
        let endpoint = SocketAddrV6::new(
            Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, id as u16),
            7075,
            0,
            0,
        );
        Self::with_endpoint(id, endpoint)
    }

    pub fn with_endpoint(id: usize, endpoint: SocketAddrV6) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id: ChannelId(id),
            endpoint,
            alive: AtomicBool::new(true),
            full: AtomicBool::new(false),
            node_id: Mutex::new(None),
            mode: Mutex::new(ChannelMode::Realtime),
            last_received: Mutex::new(now),
            last_sent: Mutex::new(now),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Messages accepted by `send`, oldest first.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Make the outbound queue report itself full; droppable sends fail.
    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }

    pub fn set_last_packet_received(&self, at: Instant) {
        *self.last_received.lock().unwrap() = at;
    }

    pub fn set_last_packet_sent(&self, at: Instant) {
        *self.last_sent.lock().unwrap() = at;
    }
}

impl Channel for NullChannel {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn remote_endpoint(&self) -> SocketAddrV6 {
        self.endpoint
    }

    fn node_id(&self) -> Option<Account> {
        *self.node_id.lock().unwrap()
    }

    fn set_node_id(&self, node_id: Account) {
        *self.node_id.lock().unwrap() = Some(node_id);
    }

    fn mode(&self) -> ChannelMode {
        *self.mode.lock().unwrap()
    }

    fn set_mode(&self, mode: ChannelMode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn protocol_version(&self) -> u8 {
        PROTOCOL_VERSION
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn last_packet_received(&self) -> Instant {
        *self.last_received.lock().unwrap()
    }

    fn last_packet_sent(&self) -> Instant {
        *self.last_sent.lock().unwrap()
    }

    fn max(&self, _traffic: TrafficType) -> bool {
        self.full.load(Ordering::SeqCst)
    }

    fn send(&self, message: &Message, drop_policy: DropPolicy, _traffic: TrafficType) -> bool {
        if !self.is_alive() {
            return false;
        }
        if drop_policy == DropPolicy::CanDrop && self.full.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(message.clone());
        *self.last_sent.lock().unwrap() = Instant::now();
        true
    }
}
