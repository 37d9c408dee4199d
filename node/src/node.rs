//! The node: every engine wired together.
//!
//! [`Node::new`] builds the component graph and registers the observers that
//! connect the engines. [`Node::start`] binds the peering port and starts the
//! worker threads and async tasks; [`Node::stop`] tears them down in reverse.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use lattice_consensus::{
    ActiveElections, ElectionBehavior, ElectionSchedulers, LocalRepresentatives, LocalVoteHistory,
    OnlineReps, RepCrawler, RepTiers, RepresentativeRegister, RequestAggregator, VoteCache,
    VoteGenerator, VoteProcessor,
};
use lattice_crypto::{generate_keypair, keypair_from_private};
use lattice_ledger::{BlockStatus, Ledger};
use lattice_messages::{Message, Publish};
use lattice_network::{map_to_v6, ChannelMode, DropPolicy, InboundMessage, Network, TcpListener};
use lattice_store::Store;
use lattice_store_lmdb::LmdbEngine;
use lattice_types::{unix_millis, Account, Block, KeyPair, PrivateKey, VoteCode};
use lattice_utils::{format_duration, Clock, SystemClock, Stats};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::block_processor::{BlockProcessor, BlockSource, ProcessedBlock};
use crate::bootstrap::{
    BootstrapAscending, BootstrapConnections, BootstrapInitiator, BootstrapServer,
    TcpBootstrapConnector,
};
use crate::cementing::ConfirmationHeightProcessor;
use crate::config::{NetworkParams, NodeConfig};
use crate::error::NodeError;
use crate::gap_cache::GapCache;
use crate::message_processor::MessageProcessor;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;
use crate::telemetry::Telemetry;
use crate::unchecked::UncheckedMap;

const LEDGER_FILE: &str = "data.ldb";
const NODE_KEY_FILE: &str = "node_id.key";
const METRICS_FILE: &str = "metrics.prom";
/// Peers not seen for this long are dropped from the peer table.
const PEER_CUTOFF_MS: u64 = 7 * 24 * 60 * 60 * 1000;
const LOCAL_VOTE_HISTORY_MAX: usize = 16 * 1024;

pub struct Node {
    pub config: NodeConfig,
    pub params: NetworkParams,
    pub stats: Arc<Stats>,
    pub node_key: Arc<KeyPair>,
    pub store: Arc<Store>,
    pub ledger: Arc<Ledger>,
    pub network: Arc<Network>,
    pub listener: Arc<TcpListener>,
    pub online_reps: Arc<OnlineReps>,
    pub representatives: Arc<RepresentativeRegister>,
    pub vote_cache: Arc<Mutex<VoteCache>>,
    pub active: Arc<ActiveElections>,
    pub rep_tiers: Arc<RepTiers>,
    pub vote_processor: Arc<VoteProcessor>,
    pub history: Arc<LocalVoteHistory>,
    pub local_reps: Arc<LocalRepresentatives>,
    pub generator: Arc<VoteGenerator>,
    pub final_generator: Arc<VoteGenerator>,
    pub aggregator: Arc<RequestAggregator>,
    pub schedulers: Arc<ElectionSchedulers>,
    pub rep_crawler: Arc<RepCrawler>,
    pub unchecked: Arc<UncheckedMap>,
    pub gap_cache: Arc<GapCache>,
    pub block_processor: Arc<BlockProcessor>,
    pub cementing: Arc<ConfirmationHeightProcessor>,
    pub bootstrap_initiator: Arc<BootstrapInitiator>,
    pub ascending: Arc<BootstrapAscending>,
    pub bootstrap_server: Arc<BootstrapServer>,
    pub telemetry: Arc<Telemetry>,
    pub metrics: Arc<NodeMetrics>,
    pub shutdown: ShutdownController,
    message_processor: Arc<MessageProcessor>,
    inbound: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: Instant,
}

impl Node {
    /// Open (or create) the node's state under `config.data_path`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: NodeConfig, params: NetworkParams) -> Result<Arc<Self>, NodeError> {
        std::fs::create_dir_all(&config.data_path)?;
        let engine = LmdbEngine::open(config.data_path.join(LEDGER_FILE), &config.lmdb)?;
        let store = Arc::new(Store::open(Arc::new(engine))?);
        let node_key = Arc::new(load_or_create_node_key(&config.data_path.join(NODE_KEY_FILE))?);
        Self::with_store(config, params, store, node_key)
    }

    /// Build a node over an already opened store.
    pub fn with_store(
        config: NodeConfig,
        params: NetworkParams,
        store: Arc<Store>,
        node_key: Arc<KeyPair>,
    ) -> Result<Arc<Self>, NodeError> {
        let handle = Handle::try_current()
            .map_err(|e| NodeError::Config(format!("node requires a tokio runtime: {e}")))?;
        let stats = Arc::new(Stats::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let ledger = Arc::new(Ledger::new(store.clone(), params.ledger.clone(), Arc::clone(&stats))?);
        tracing::info!(
            network = ?config.network,
            blocks = ledger.block_count(),
            cemented = ledger.cemented_count(),
            accounts = ledger.account_count(),
            "ledger opened"
        );

        let network = Arc::new(Network::new(
            params.network.clone(),
            config.connection_limits(&params.network),
            Arc::clone(&stats),
        ));
        let (sink, inbound) = mpsc::channel(config.network_config.max_queue);
        let listener = TcpListener::new(
            Arc::clone(&network),
            Arc::clone(&node_key),
            Arc::clone(&stats),
            config.listener_config(),
            sink,
        );

        let online_reps = Arc::new(OnlineReps::new(Arc::clone(&ledger), config.online_reps.clone()));
        online_reps.initialize();
        let representatives = Arc::new(RepresentativeRegister::new(
            Arc::clone(&ledger),
            Arc::clone(&online_reps),
            Arc::clone(&stats),
        ));
        let vote_cache = Arc::new(Mutex::new(VoteCache::new(config.vote_cache.clone())));
        let active = Arc::new(ActiveElections::new(
            config.active_elections.clone(),
            Arc::clone(&ledger),
            Arc::clone(&online_reps),
            Arc::clone(&representatives),
            Arc::clone(&network),
            Arc::clone(&vote_cache),
            Arc::clone(&stats),
            Arc::clone(&clock),
        ));
        let rep_tiers = Arc::new(RepTiers::new(
            Arc::clone(&ledger),
            Arc::clone(&online_reps),
            &params.network,
            Arc::clone(&stats),
        ));
        let vote_processor = Arc::new(VoteProcessor::new(
            config.vote_processor.clone(),
            Arc::clone(&active),
            Arc::clone(&online_reps),
            Arc::clone(&rep_tiers),
            Arc::clone(&stats),
            Arc::clone(&clock),
        ));

        let history = Arc::new(LocalVoteHistory::new(LOCAL_VOTE_HISTORY_MAX));
        let local_reps = Arc::new(LocalRepresentatives::new(Arc::clone(&ledger)));
        for key in &config.voting_keys {
            local_reps.insert(Arc::new(parse_voting_key(key)?));
        }
        if !local_reps.is_empty() {
            tracing::info!(representatives = local_reps.len(), "voting enabled");
        }
        let new_generator = |is_final: bool| {
            Arc::new(VoteGenerator::new(
                is_final,
                Arc::clone(&ledger),
                Arc::clone(&history),
                Arc::clone(&representatives),
                Arc::clone(&local_reps),
                Arc::clone(&network),
                Arc::clone(&stats),
                Arc::clone(&clock),
            ))
        };
        let generator = new_generator(false);
        let final_generator = new_generator(true);
        let aggregator = Arc::new(RequestAggregator::new(
            config.request_aggregator.clone(),
            Arc::clone(&ledger),
            Arc::clone(&history),
            Arc::clone(&generator),
            Arc::clone(&final_generator),
            Arc::clone(&stats),
        ));
        let schedulers = Arc::new(ElectionSchedulers::new(
            config.priority_scheduler.clone(),
            config.hinted_scheduler.clone(),
            config.optimistic_scheduler.clone(),
            Arc::clone(&ledger),
            Arc::clone(&active),
            Arc::clone(&online_reps),
            Arc::clone(&stats),
        ));
        let rep_crawler = Arc::new(RepCrawler::new(
            config.rep_crawler.clone(),
            Arc::clone(&ledger),
            Arc::clone(&active),
            Arc::clone(&representatives),
            Arc::clone(&online_reps),
            Arc::clone(&network),
            Arc::clone(&stats),
            Arc::clone(&clock),
        ));

        let unchecked = Arc::new(UncheckedMap::new(
            config.block_processor.unchecked_max,
            Arc::clone(&stats),
        ));
        let gap_cache = Arc::new(GapCache::new(
            Arc::clone(&ledger),
            Arc::clone(&online_reps),
            Arc::clone(&stats),
            config.bootstrap.fraction_numerator,
        ));
        let block_processor = Arc::new(BlockProcessor::new(
            config.block_processor.clone(),
            Arc::clone(&ledger),
            Arc::clone(&unchecked),
            Arc::clone(&gap_cache),
            Arc::clone(&stats),
        ));
        let cementing = Arc::new(ConfirmationHeightProcessor::new(
            config.confirmation_height.clone(),
            Arc::clone(&ledger),
            Arc::clone(&stats),
        ));

        let connections = Arc::new(BootstrapConnections::new(
            config.bootstrap.clone(),
            Arc::new(TcpBootstrapConnector::new(
                handle.clone(),
                Arc::clone(&listener),
                Arc::clone(&network),
            )),
            Arc::clone(&stats),
        ));
        let bootstrap_initiator = Arc::new(BootstrapInitiator::new(
            config.bootstrap.clone(),
            params.bootstrap.clone(),
            Arc::clone(&ledger),
            Arc::clone(&block_processor),
            Arc::clone(&connections),
            Arc::clone(&stats),
        ));
        let ascending = Arc::new(BootstrapAscending::new(
            config.bootstrap_ascending.clone(),
            Arc::clone(&ledger),
            Arc::clone(&block_processor),
            Arc::clone(&network),
            Arc::clone(&stats),
        ));
        let bootstrap_server = Arc::new(BootstrapServer::new(
            Arc::clone(&ledger),
            Arc::clone(&block_processor),
            Arc::clone(&stats),
        ));
        let telemetry = Arc::new(Telemetry::new(
            Arc::clone(&node_key),
            Arc::clone(&ledger),
            Arc::clone(&network),
            Arc::clone(&unchecked),
            Arc::clone(&stats),
        ));
        let metrics = Arc::new(NodeMetrics::new()?);

        let own_endpoint = (config.peering_port != 0)
            .then(|| SocketAddrV6::new(Ipv6Addr::LOCALHOST, config.peering_port, 0, 0));
        let message_processor = Arc::new(MessageProcessor {
            network: Arc::clone(&network),
            block_processor: Arc::clone(&block_processor),
            vote_processor: Arc::clone(&vote_processor),
            rep_crawler: Arc::clone(&rep_crawler),
            aggregator: Arc::clone(&aggregator),
            telemetry: Arc::clone(&telemetry),
            bootstrap_server: Arc::clone(&bootstrap_server),
            connections,
            ascending: Arc::clone(&ascending),
            connector: keepalive_connector(handle, Arc::downgrade(&listener)),
            own_endpoint,
            keepalive_connects: config.network_config.keepalive_connects,
            stats: Arc::clone(&stats),
        });

        let node = Arc::new(Self {
            config,
            params,
            stats,
            node_key,
            store,
            ledger,
            network,
            listener,
            online_reps,
            representatives,
            vote_cache,
            active,
            rep_tiers,
            vote_processor,
            history,
            local_reps,
            generator,
            final_generator,
            aggregator,
            schedulers,
            rep_crawler,
            unchecked,
            gap_cache,
            block_processor,
            cementing,
            bootstrap_initiator,
            ascending,
            bootstrap_server,
            telemetry,
            metrics,
            shutdown: ShutdownController::new(),
            message_processor,
            inbound: Mutex::new(Some(inbound)),
            tasks: Mutex::new(Vec::new()),
            started: Instant::now(),
        });
        node.wire_observers();
        Ok(node)
    }

    /// Drop this node's votes for the block `winner` replaced, both from the
    /// election tally and from the local vote history, so local
    /// representatives can vote for the new winner right away.
    fn remove_replaced_local_votes(&self, winner: &Block) {
        let root = winner.root();
        let hash = winner.hash();
        let replaced: Vec<Account> = self
            .history
            .votes_for_root(&root)
            .iter()
            .filter(|vote| !vote.hashes.contains(&hash))
            .map(|vote| vote.voting_account)
            .collect();
        if replaced.is_empty() {
            return;
        }
        if let Some(election) = self.active.election(&winner.qualified_root()) {
            election.remove_votes(&replaced);
        }
        self.history.erase(&root);
        tracing::debug!(%root, %hash, votes = replaced.len(), "local votes for replaced winner removed");
    }

    fn wire_observers(self: &Arc<Self>) {
        let node = Arc::downgrade(self);
        self.block_processor.on_batch_processed(move |batch| {
            if let Some(node) = node.upgrade() {
                node.blocks_processed(batch);
            }
        });

        let node = Arc::downgrade(self);
        self.block_processor.on_rolled_back(move |rolled_back, root| {
            let Some(node) = node.upgrade() else {
                return;
            };
            for saved in rolled_back {
                let rolled_root = saved.block.qualified_root();
                if rolled_root != *root {
                    node.active.erase(&rolled_root);
                }
                // Local votes for a block that left the ledger must not be
                // replayed to confirm_req.
                node.history.erase(&saved.block.root());
            }
        });

        let cementing = Arc::downgrade(&self.cementing);
        self.active.on_election_confirmed(move |_, status| {
            if let Some(cementing) = cementing.upgrade() {
                cementing.add(status.winner.hash());
            }
        });

        let node = Arc::downgrade(self);
        self.active.on_winner_changed(move |winner| {
            if let Some(node) = node.upgrade() {
                node.remove_replaced_local_votes(winner);
                node.block_processor.force(winner.clone());
            }
        });

        let generator = Arc::downgrade(&self.generator);
        let final_generator = Arc::downgrade(&self.final_generator);
        self.active.on_vote_requested(move |root, hash, is_final| {
            let target = if is_final { &final_generator } else { &generator };
            if let Some(generator) = target.upgrade() {
                generator.add(root, hash);
            }
        });

        let schedulers = Arc::downgrade(&self.schedulers);
        self.active.on_vacancy_updated(move || {
            if let Some(schedulers) = schedulers.upgrade() {
                schedulers.notify();
            }
        });

        for generator in [&self.generator, &self.final_generator] {
            let vote_processor = Arc::downgrade(&self.vote_processor);
            generator.on_vote(move |vote| {
                if let Some(vote_processor) = vote_processor.upgrade() {
                    vote_processor.vote(Arc::clone(vote), None);
                }
            });
        }

        let node = Arc::downgrade(self);
        self.vote_processor.on_vote_processed(move |vote, _channel, code| {
            let Some(node) = node.upgrade() else {
                return;
            };
            node.metrics.votes_processed.inc();
            if code == VoteCode::Invalid {
                return;
            }
            for hash in node.gap_cache.vote(vote) {
                if node.config.bootstrap.disable_lazy {
                    node.bootstrap_initiator.bootstrap(false, None);
                } else {
                    node.bootstrap_initiator.bootstrap_lazy(hash.into(), false, None);
                }
            }
        });

        let node = Arc::downgrade(self);
        self.cementing.on_cemented(move |saved| {
            let Some(node) = node.upgrade() else {
                return;
            };
            node.metrics.blocks_cemented.inc();
            node.active.block_cemented(&saved.hash());
            let txn = node.ledger.store.tx_begin_read();
            node.schedulers.activate_successors(&txn, saved);
        });

        let active = Arc::downgrade(&self.active);
        self.cementing.on_already_cemented(move |hash| {
            if let Some(active) = active.upgrade() {
                active.block_cemented(hash);
            }
        });
    }

    fn blocks_processed(&self, batch: &[ProcessedBlock]) {
        let txn = self.ledger.store.tx_begin_read();
        let mut progress = 0;
        for processed in batch {
            match processed.status {
                BlockStatus::Progress => {
                    progress += 1;
                    if let Some(saved) = &processed.saved {
                        self.schedulers.activate(&txn, &saved.account());
                    }
                    match processed.source {
                        BlockSource::Local => self.flood(&processed.block, true),
                        BlockSource::Live | BlockSource::LiveOriginator => {
                            self.flood(&processed.block, false)
                        }
                        _ => {}
                    }
                }
                BlockStatus::Fork if processed.source.is_live() || processed.source == BlockSource::Local => {
                    self.fork_detected(&txn, &processed.block);
                }
                _ => {}
            }
        }
        drop(txn);
        self.metrics.blocks_processed.inc_by(progress);
        self.ascending.inspect(batch);
    }

    /// Start an election between the ledger's block on this root and `fork`.
    fn fork_detected(&self, txn: &dyn lattice_store::Transaction, fork: &Block) {
        let root = fork.qualified_root();
        let existing = self
            .ledger
            .successor(txn, &root)
            .and_then(|hash| self.ledger.block(txn, &hash));
        let Some(existing) = existing else {
            return;
        };
        if self.ledger.block_confirmed(txn, &existing.hash()) {
            return;
        }
        tracing::debug!(root = ?root, fork = %fork.hash(), existing = %existing.hash(), "fork detected");
        self.active.insert(&existing.block, ElectionBehavior::Manual);
        self.active.publish(fork);
    }

    fn flood(&self, block: &Block, is_originator: bool) {
        let message = Message::Publish(Publish {
            block: block.clone(),
            is_originator,
        });
        let policy = if is_originator {
            DropPolicy::ShouldNotDrop
        } else {
            DropPolicy::CanDrop
        };
        self.network.flood(&message, policy, 1.0);
    }

    /// Process a block created by this node and wait for the result.
    pub fn process_local(&self, block: Block) -> Option<BlockStatus> {
        self.block_processor.add_blocking(block, BlockSource::Local)
    }

    /// Queue a block as if it arrived from a peer.
    pub fn process_active(&self, block: Block) -> bool {
        self.block_processor.add(block, BlockSource::Live)
    }

    /// Bind the peering port and start every worker.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, NodeError> {
        let bound = self.listener.bind().await?;
        let local_addr = bound.local_addr()?;
        tracing::info!(node_id = %self.node_key.account(), address = %local_addr, "node starting");

        self.block_processor.start()?;
        self.cementing.start()?;
        self.active.start()?;
        self.vote_processor.start()?;
        self.rep_tiers.start()?;
        self.generator.start()?;
        self.final_generator.start()?;
        self.aggregator.start()?;
        self.schedulers.start()?;
        self.rep_crawler.start()?;
        self.bootstrap_server.start()?;
        self.ascending.start()?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(
            Arc::clone(&self.listener).run(bound, self.shutdown.subscribe()),
        ));
        if let Some(inbound) = self.inbound.lock().unwrap().take() {
            tasks.push(tokio::spawn(
                Arc::clone(&self.message_processor).run(inbound, self.shutdown.subscribe()),
            ));
        }
        tasks.push(tokio::spawn(Arc::clone(self).maintenance()));
        *self.tasks.lock().unwrap() = tasks;

        self.connect_known_peers().await;
        Ok(local_addr)
    }

    async fn connect_known_peers(&self) {
        let mut endpoints = Vec::new();
        for peer in &self.config.preconfigured_peers {
            match tokio::net::lookup_host(peer.as_str()).await {
                Ok(addrs) => endpoints.extend(addrs.map(map_to_v6)),
                Err(e) => tracing::warn!(peer = %peer, error = %e, "cannot resolve preconfigured peer"),
            }
        }
        {
            let txn = self.store.tx_begin_read();
            endpoints.extend(self.store.peer.iter(&txn).map(|(endpoint, _)| endpoint));
        }
        endpoints.sort();
        endpoints.dedup();
        for endpoint in endpoints {
            let listener = Arc::clone(&self.listener);
            tokio::spawn(async move {
                if let Err(e) = listener.connect(endpoint, ChannelMode::Realtime).await {
                    tracing::debug!(%endpoint, error = %e, "peer connection failed");
                }
            });
        }
    }

    async fn maintenance(self: Arc<Self>) {
        let constants = &self.params.network;
        let mut shutdown = self.shutdown.subscribe();
        let mut keepalive = tokio::time::interval(constants.keepalive_period);
        let mut cleanup = tokio::time::interval(constants.cleanup_period);
        let mut telemetry = tokio::time::interval(constants.telemetry_cache_cutoff / 2);
        let mut online = tokio::time::interval(self.config.online_reps.weight_period());
        let mut bootstrap = tokio::time::interval(if constants.is_dev() {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(300)
        });
        let mut metrics = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::debug!("maintenance task shutting down");
                    break;
                }
                _ = keepalive.tick() => self.network.keepalive(),
                _ = cleanup.tick() => self.cleanup(),
                _ = telemetry.tick() => self.telemetry.request_all(),
                _ = online.tick() => {
                    if let Err(e) = self.online_reps.sample() {
                        tracing::warn!(error = %e, "online weight sample failed");
                    }
                }
                _ = bootstrap.tick() => {
                    if self.network.count() > 0 && !self.bootstrap_initiator.in_progress() {
                        self.bootstrap_initiator.bootstrap(false, None);
                    }
                }
                _ = metrics.tick() => self.refresh_metrics(),
            }
        }
    }

    fn cleanup(&self) {
        let now = Instant::now();
        self.network.purge();
        let cutoff = Duration::from_secs(self.config.block_processor.unchecked_cutoff_secs);
        let expired = self.unchecked.cleanup(now, cutoff);
        if expired > 0 {
            tracing::debug!(expired, "unchecked blocks expired");
        }
        self.vote_cache.lock().unwrap().cleanup(now);
        self.representatives.cleanup();
        self.telemetry.cleanup(now);
    }

    fn refresh_metrics(&self) {
        let m = &self.metrics;
        m.block_count.set(self.ledger.block_count() as i64);
        m.cemented_count.set(self.ledger.cemented_count() as i64);
        m.account_count.set(self.ledger.account_count() as i64);
        m.unchecked_count.set(self.unchecked.len() as i64);
        m.active_elections.set(self.active.len() as i64);
        m.peer_count.set(self.network.count() as i64);
        if !self.config.enable_metrics {
            return;
        }
        match m.encode() {
            Ok(text) => {
                if let Err(e) = std::fs::write(self.config.data_path.join(METRICS_FILE), text) {
                    tracing::warn!(error = %e, "failed to write metrics");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode metrics"),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop every worker in reverse start order and flush the store.
    pub async fn stop(&self) -> Result<(), NodeError> {
        if !self.shutdown.trigger() {
            return Ok(());
        }
        tracing::info!("node stopping");
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }

        self.save_peers()?;
        self.network.close_all();

        self.ascending.stop();
        self.bootstrap_initiator.stop();
        self.bootstrap_server.stop();
        self.rep_crawler.stop();
        self.schedulers.stop();
        self.aggregator.stop();
        self.final_generator.stop();
        self.generator.stop();
        self.rep_tiers.stop();
        self.vote_processor.stop();
        self.active.stop();
        self.cementing.stop();
        self.block_processor.stop();

        self.store.flush()?;
        tracing::info!(
            blocks = self.ledger.block_count(),
            cemented = self.ledger.cemented_count(),
            uptime = %format_duration(self.uptime().as_secs()),
            "node stopped"
        );
        Ok(())
    }

    fn save_peers(&self) -> Result<(), NodeError> {
        let now = unix_millis();
        let mut txn = self.store.tx_begin_write();
        for channel in self.network.list(0) {
            self.store.peer.put(&mut txn, &channel.remote_endpoint(), &now);
        }
        self.store
            .peer
            .purge_older_than(&mut txn, now.saturating_sub(PEER_CUTOFF_MS));
        txn.commit()?;
        Ok(())
    }
}

fn keepalive_connector(handle: Handle, listener: Weak<TcpListener>) -> crate::message_processor::PeerConnector {
    Box::new(move |endpoint| {
        let Some(listener) = listener.upgrade() else {
            return;
        };
        handle.spawn(async move {
            if let Err(e) = listener.connect(endpoint, ChannelMode::Realtime).await {
                tracing::trace!(%endpoint, error = %e, "keepalive peer connection failed");
            }
        });
    })
}

fn parse_private_key(text: &str) -> Result<PrivateKey, NodeError> {
    let bytes = hex::decode(text.trim()).map_err(|e| NodeError::Config(format!("invalid key: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| NodeError::Config("private key must be 32 bytes".to_string()))?;
    Ok(PrivateKey(bytes))
}

fn parse_voting_key(text: &str) -> Result<KeyPair, NodeError> {
    Ok(keypair_from_private(parse_private_key(text)?))
}

/// The node id is kept across restarts so peers recognise this node.
fn load_or_create_node_key(path: &Path) -> Result<KeyPair, NodeError> {
    if path.exists() {
        let text = std::fs::read_to_string(path)?;
        return Ok(keypair_from_private(parse_private_key(&text)?));
    }
    let key = generate_keypair();
    std::fs::write(path, hex::encode(key.private.0))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voting_keys_must_be_32_bytes() {
        assert!(parse_voting_key(&"11".repeat(32)).is_ok());
        assert!(matches!(parse_voting_key("1122"), Err(NodeError::Config(_))));
        assert!(matches!(parse_voting_key("zz"), Err(NodeError::Config(_))));
    }

    #[test]
    fn node_key_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(NODE_KEY_FILE);
        let first = load_or_create_node_key(&path).unwrap();
        let second = load_or_create_node_key(&path).unwrap();
        assert_eq!(first.account(), second.account());
    }
}
