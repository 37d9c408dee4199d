//! Bootstrap connections and the pull queue they serve.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddrV6;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use lattice_messages::Message;
use lattice_network::{Channel, ChannelId, ChannelMode, DropPolicy, Network, TcpListener, TrafficType};
use lattice_utils::{DetailType, Direction, StatType, Stats};
use tokio::runtime::Handle;

use super::pull::PullInfo;
use super::pulls_cache::PullsCache;
use crate::config::BootstrapConfig;

/// Replies buffered per client before further ones are dropped.
const INBOX_MAX: usize = 256;
/// How long `connection()` waits for a pooled client to come back.
const CONNECTION_WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Inbox {
    messages: VecDeque<Message>,
    stopped: bool,
}

/// One bootstrap connection. Replies are delivered into its inbox by the
/// message processor and consumed by the attempt thread that holds it.
pub struct BootstrapClient {
    channel: Arc<dyn Channel>,
    inbox: Mutex<Inbox>,
    condition: Condvar,
}

impl BootstrapClient {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            inbox: Mutex::new(Inbox::default()),
            condition: Condvar::new(),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.channel_id()
    }

    pub fn endpoint(&self) -> SocketAddrV6 {
        self.channel.remote_endpoint()
    }

    pub fn is_alive(&self) -> bool {
        self.channel.is_alive() && !self.inbox.lock().unwrap().stopped
    }

    pub fn send(&self, message: &Message) -> bool {
        self.channel
            .send(message, DropPolicy::ShouldNotDrop, TrafficType::Bootstrap)
    }

    pub fn push(&self, message: Message) -> bool {
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.stopped || inbox.messages.len() >= INBOX_MAX {
            return false;
        }
        inbox.messages.push_back(message);
        self.condition.notify_all();
        true
    }

    /// Next reply, waiting up to `timeout`. None on timeout or stop.
    pub fn receive(&self, timeout: Duration) -> Option<Message> {
        let inbox = self.inbox.lock().unwrap();
        let (mut inbox, _) = self
            .condition
            .wait_timeout_while(inbox, timeout, |i| !i.stopped && i.messages.is_empty())
            .unwrap();
        if inbox.stopped {
            return None;
        }
        inbox.messages.pop_front()
    }

    pub fn stop(&self) {
        self.inbox.lock().unwrap().stopped = true;
        self.condition.notify_all();
        self.channel.close();
    }
}

/// Opens bootstrap connections for the attempt threads.
pub trait BootstrapConnector: Send + Sync {
    /// Connect to some peer. Blocks the calling thread.
    fn connect(&self) -> Option<Arc<dyn Channel>>;
}

/// Connects over TCP to a random realtime peer.
pub struct TcpBootstrapConnector {
    handle: Handle,
    listener: Arc<TcpListener>,
    network: Arc<Network>,
}

impl TcpBootstrapConnector {
    pub fn new(handle: Handle, listener: Arc<TcpListener>, network: Arc<Network>) -> Self {
        Self {
            handle,
            listener,
            network,
        }
    }
}

impl BootstrapConnector for TcpBootstrapConnector {
    fn connect(&self) -> Option<Arc<dyn Channel>> {
        let peer = self.network.random_channels(1).into_iter().next()?;
        let endpoint = peer.remote_endpoint();
        match self
            .handle
            .block_on(self.listener.connect(endpoint, ChannelMode::Bootstrap))
        {
            Ok(channel) => {
                let channel: Arc<dyn Channel> = channel;
                Some(channel)
            }
            Err(e) => {
                tracing::debug!(%endpoint, error = %e, "bootstrap connection failed");
                None
            }
        }
    }
}

#[derive(Default)]
struct Pool {
    stopped: bool,
    idle: VecDeque<Arc<BootstrapClient>>,
    clients: HashMap<ChannelId, Arc<BootstrapClient>>,
    connecting: usize,
    pulls: VecDeque<PullInfo>,
}

/// Pool of bootstrap clients plus the queue of pulls waiting for one.
pub struct BootstrapConnections {
    config: BootstrapConfig,
    connector: Arc<dyn BootstrapConnector>,
    stats: Arc<Stats>,
    pulls_cache: Mutex<PullsCache>,
    pool: Mutex<Pool>,
    condition: Condvar,
}

impl BootstrapConnections {
    pub fn new(config: BootstrapConfig, connector: Arc<dyn BootstrapConnector>, stats: Arc<Stats>) -> Self {
        let pulls_cache = Mutex::new(PullsCache::new(config.pulls_cache_size));
        Self {
            config,
            connector,
            stats,
            pulls_cache,
            pool: Mutex::new(Pool::default()),
            condition: Condvar::new(),
        }
    }

    /// An idle client, or a new connection while below the maximum.
    pub fn connection(&self) -> Option<Arc<BootstrapClient>> {
        let deadline = Instant::now() + CONNECTION_WAIT;
        let mut pool = self.pool.lock().unwrap();
        loop {
            if pool.stopped {
                return None;
            }
            while let Some(client) = pool.idle.pop_front() {
                if client.is_alive() {
                    return Some(client);
                }
                pool.clients.remove(&client.channel_id());
            }
            if pool.clients.len() + pool.connecting < self.config.connections_max.max(1) {
                pool.connecting += 1;
                drop(pool);
                let channel = self.connector.connect();
                pool = self.pool.lock().unwrap();
                pool.connecting -= 1;
                let Some(channel) = channel else {
                    self.stats
                        .inc_dir(StatType::Bootstrap, DetailType::ConnectFailure, Direction::Out);
                    return None;
                };
                self.stats
                    .inc_dir(StatType::Bootstrap, DetailType::ConnectSuccess, Direction::Out);
                let client = Arc::new(BootstrapClient::new(channel));
                pool.clients.insert(client.channel_id(), Arc::clone(&client));
                return Some(client);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            pool = self.condition.wait_timeout(pool, deadline - now).unwrap().0;
        }
    }

    /// Hand a client back after a successful exchange.
    pub fn pool_connection(&self, client: Arc<BootstrapClient>) {
        let mut pool = self.pool.lock().unwrap();
        if pool.stopped || !client.is_alive() {
            pool.clients.remove(&client.channel_id());
            drop(pool);
            client.stop();
        } else {
            pool.idle.push_back(client);
        }
        self.condition.notify_all();
    }

    /// Close a client whose stream is in an unknown state.
    pub fn discard(&self, client: &BootstrapClient) {
        client.stop();
        self.pool.lock().unwrap().clients.remove(&client.channel_id());
        self.condition.notify_all();
    }

    /// Route a reply to the client owning `channel_id`.
    pub fn deliver(&self, channel_id: ChannelId, message: Message) -> bool {
        let client = self.pool.lock().unwrap().clients.get(&channel_id).cloned();
        match client {
            Some(client) => client.push(message),
            None => false,
        }
    }

    /// Clients to run for `pulls_remaining` queued pulls.
    pub fn target_connections(&self, pulls_remaining: usize) -> usize {
        let base = self.config.connections.max(1);
        let max = self.config.connections_max.max(base);
        let fraction = (pulls_remaining as f64 / 50_000.0).min(1.0);
        base + ((max - base) as f64 * fraction) as usize
    }

    pub fn add_pull(&self, mut pull: PullInfo) {
        self.pulls_cache.lock().unwrap().update_pull(&mut pull);
        self.pool.lock().unwrap().pulls.push_back(pull);
        self.condition.notify_all();
    }

    /// Put a pull back at the front without counting an attempt.
    pub(crate) fn return_pull(&self, pull: PullInfo) {
        self.pool.lock().unwrap().pulls.push_front(pull);
    }

    /// Retry a failed pull, or drop it once it exceeds its retry limit.
    pub fn requeue_pull(&self, mut pull: PullInfo) {
        pull.attempts += 1;
        self.pulls_cache.lock().unwrap().add(&pull, Instant::now());
        if pull.attempts <= pull.retry_limit {
            self.stats
                .inc(StatType::Bootstrap, DetailType::BulkPullRequeued);
            self.pool.lock().unwrap().pulls.push_front(pull);
            self.condition.notify_all();
        } else {
            self.stats
                .inc(StatType::Bootstrap, DetailType::BulkPullFailedAccount);
            tracing::debug!(
                account_or_head = %pull.account_or_head,
                attempts = pull.attempts,
                processed = pull.processed,
                "pull failed too often, dropped"
            );
        }
    }

    pub(crate) fn pull_done(&self, pull: &PullInfo) {
        self.pulls_cache.lock().unwrap().remove(pull);
    }

    pub(crate) fn next_pull(&self, bootstrap_id: u64) -> Option<PullInfo> {
        let mut pool = self.pool.lock().unwrap();
        let index = pool
            .pulls
            .iter()
            .position(|p| p.bootstrap_id == bootstrap_id)?;
        pool.pulls.remove(index)
    }

    pub fn pulls_len(&self, bootstrap_id: u64) -> usize {
        self.pool
            .lock()
            .unwrap()
            .pulls
            .iter()
            .filter(|p| p.bootstrap_id == bootstrap_id)
            .count()
    }

    /// Forget every queued pull of a finished attempt.
    pub fn clear_pulls(&self, bootstrap_id: u64) {
        self.pool
            .lock()
            .unwrap()
            .pulls
            .retain(|p| p.bootstrap_id != bootstrap_id);
    }

    pub fn connections_count(&self) -> usize {
        self.pool.lock().unwrap().clients.len()
    }

    pub fn stop(&self) {
        let clients: Vec<Arc<BootstrapClient>> = {
            let mut pool = self.pool.lock().unwrap();
            pool.stopped = true;
            pool.idle.clear();
            pool.clients.drain().map(|(_, c)| c).collect()
        };
        for client in clients {
            client.stop();
        }
        self.condition.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_messages::BulkPullResp;
    use lattice_nullables::NullChannel;
    use lattice_types::{Account, BlockHash};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector(AtomicUsize);

    impl BootstrapConnector for CountingConnector {
        fn connect(&self) -> Option<Arc<dyn Channel>> {
            let id = self.0.fetch_add(1, Ordering::SeqCst);
            let channel: Arc<dyn Channel> = NullChannel::new(id + 1);
            Some(channel)
        }
    }

    fn connections(max: usize) -> BootstrapConnections {
        let config = BootstrapConfig {
            connections: 1,
            connections_max: max,
            ..BootstrapConfig::default()
        };
        BootstrapConnections::new(
            config,
            Arc::new(CountingConnector(AtomicUsize::new(0))),
            Arc::new(Stats::new()),
        )
    }

    fn pull(id: u64, retry_limit: u32) -> PullInfo {
        PullInfo::new(Account::new([1; 32]).into(), BlockHash::new([2; 32]), BlockHash::ZERO, 0, id, retry_limit)
    }

    #[test]
    fn pooled_client_is_reused() {
        let connections = connections(4);
        let first = connections.connection().unwrap();
        let id = first.channel_id();
        connections.pool_connection(first);
        assert_eq!(connections.connection().unwrap().channel_id(), id);
        assert_eq!(connections.connections_count(), 1);
    }

    #[test]
    fn replies_reach_the_owning_client() {
        let connections = connections(4);
        let client = connections.connection().unwrap();
        assert!(connections.deliver(client.channel_id(), Message::BulkPullResp(BulkPullResp::default())));
        assert!(!connections.deliver(ChannelId(999), Message::BulkPullResp(BulkPullResp::default())));
        assert!(matches!(
            client.receive(Duration::from_millis(10)),
            Some(Message::BulkPullResp(_))
        ));
        assert!(client.receive(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn requeue_respects_retry_limit() {
        let connections = connections(4);
        connections.add_pull(pull(7, 1));
        let p = connections.next_pull(7).unwrap();
        connections.requeue_pull(p);
        let p = connections.next_pull(7).unwrap();
        assert_eq!(p.attempts, 1);
        connections.requeue_pull(p);
        assert!(connections.next_pull(7).is_none());
    }

    #[test]
    fn clear_pulls_only_touches_one_attempt() {
        let connections = connections(4);
        connections.add_pull(pull(1, 4));
        connections.add_pull(pull(2, 4));
        connections.clear_pulls(1);
        assert_eq!(connections.pulls_len(1), 0);
        assert_eq!(connections.pulls_len(2), 1);
    }

    #[test]
    fn target_grows_with_backlog() {
        let connections = connections(64);
        assert_eq!(connections.target_connections(0), 1);
        assert_eq!(connections.target_connections(1_000_000), 64);
    }
}
