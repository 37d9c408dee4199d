use std::collections::VecDeque;
use std::net::SocketAddrV6;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lattice_messages::Message;
use lattice_protocol::{MessageCodec, PROTOCOL_VERSION};
use lattice_types::Account;
use lattice_utils::{DetailType, Direction, StatType, Stats};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::channel::{message_detail, Channel, ChannelId, ChannelMode, DropPolicy, TrafficType};
use crate::limits::Direction as ConnectionDirection;

/// Default per-traffic-type queue budget.
pub const DEFAULT_QUEUE_SIZE: usize = 128;

struct ChannelState {
    node_id: Option<Account>,
    mode: ChannelMode,
    last_received: Instant,
    last_sent: Instant,
}

#[derive(Default)]
struct OutboundQueues {
    generic: VecDeque<Vec<u8>>,
    bootstrap: VecDeque<Vec<u8>>,
}

impl OutboundQueues {
    fn queue(&mut self, traffic: TrafficType) -> &mut VecDeque<Vec<u8>> {
        match traffic {
            TrafficType::Generic => &mut self.generic,
            TrafficType::Bootstrap => &mut self.bootstrap,
        }
    }

    fn len(&self, traffic: TrafficType) -> usize {
        match traffic {
            TrafficType::Generic => self.generic.len(),
            TrafficType::Bootstrap => self.bootstrap.len(),
        }
    }

    /// Alternates fairly by always preferring the longer queue.
    fn pop(&mut self) -> Option<Vec<u8>> {
        if self.bootstrap.len() > self.generic.len() {
            self.bootstrap.pop_front()
        } else {
            self.generic.pop_front().or_else(|| self.bootstrap.pop_front())
        }
    }
}

/// A TCP connection to a peer.
///
/// Outbound frames are queued and written by a dedicated writer task; the
/// read side is driven by the listener.
pub struct TcpChannel {
    id: ChannelId,
    remote: SocketAddrV6,
    direction: ConnectionDirection,
    codec: MessageCodec,
    stats: Arc<Stats>,
    max_queue: usize,
    alive: AtomicBool,
    state: Mutex<ChannelState>,
    queues: Mutex<OutboundQueues>,
    notify: Notify,
}

impl TcpChannel {
    pub fn new(
        id: ChannelId,
        remote: SocketAddrV6,
        direction: ConnectionDirection,
        codec: MessageCodec,
        stats: Arc<Stats>,
        max_queue: usize,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id,
            remote,
            direction,
            codec,
            stats,
            max_queue,
            alive: AtomicBool::new(true),
            state: Mutex::new(ChannelState {
                node_id: None,
                mode: ChannelMode::Undefined,
                last_received: now,
                last_sent: now,
            }),
            queues: Mutex::new(OutboundQueues::default()),
            notify: Notify::new(),
        })
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    pub fn queue_len(&self, traffic: TrafficType) -> usize {
        self.queues.lock().unwrap().len(traffic)
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        self.state.lock().unwrap().last_received = Instant::now();
    }

    /// Start the task that drains the outbound queues into `writer`.
    pub fn spawn_writer(self: &Arc<Self>, writer: OwnedWriteHalf) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = channel.write_loop(writer).await {
                tracing::debug!(channel = %channel.id, peer = %channel.remote, error = %e, "write failed");
            }
            channel.close();
        })
    }

    async fn write_loop(&self, mut writer: OwnedWriteHalf) -> std::io::Result<()> {
        loop {
            let next = self.queues.lock().unwrap().pop();
            match next {
                Some(frame) => {
                    writer.write_all(&frame).await?;
                    self.state.lock().unwrap().last_sent = Instant::now();
                }
                None => {
                    if !self.is_alive() {
                        break;
                    }
                    self.notify.notified().await;
                }
            }
        }
        writer.shutdown().await
    }
}

impl Channel for TcpChannel {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn remote_endpoint(&self) -> SocketAddrV6 {
        self.remote
    }

    fn node_id(&self) -> Option<Account> {
        self.state.lock().unwrap().node_id
    }

    fn set_node_id(&self, node_id: Account) {
        self.state.lock().unwrap().node_id = Some(node_id);
    }

    fn mode(&self) -> ChannelMode {
        self.state.lock().unwrap().mode
    }

    fn set_mode(&self, mode: ChannelMode) {
        self.state.lock().unwrap().mode = mode;
    }

    fn protocol_version(&self) -> u8 {
        PROTOCOL_VERSION
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            tracing::debug!(channel = %self.id, peer = %self.remote, "channel closed");
        }
        self.notify.notify_one();
    }

    fn last_packet_received(&self) -> Instant {
        self.state.lock().unwrap().last_received
    }

    fn last_packet_sent(&self) -> Instant {
        self.state.lock().unwrap().last_sent
    }

    fn max(&self, traffic: TrafficType) -> bool {
        self.queue_len(traffic) >= self.max_queue
    }

    fn send(&self, message: &Message, drop_policy: DropPolicy, traffic: TrafficType) -> bool {
        if !self.is_alive() {
            return false;
        }
        let frame = match self.codec.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel = %self.id, error = %e, "failed to encode message");
                return false;
            }
        };
        let limit = match drop_policy {
            DropPolicy::CanDrop => self.max_queue,
            DropPolicy::ShouldNotDrop => self.max_queue * 2,
        };
        {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues.queue(traffic);
            if queue.len() >= limit {
                drop(queues);
                self.stats.inc_dir(StatType::Tcp, DetailType::Drop, Direction::Out);
                return false;
            }
            queue.push_back(frame);
        }
        self.stats.inc_dir(
            StatType::Message,
            message_detail(message.message_type()),
            Direction::Out,
        );
        self.notify.notify_one();
        true
    }
}
