//! Routes messages received from peers to the component that handles them.

use std::net::SocketAddrV6;
use std::sync::Arc;

use lattice_consensus::{RepCrawler, RequestAggregator, VoteProcessor};
use lattice_messages::Message;
use lattice_network::{Channel, InboundMessage, Network};
use lattice_types::Vote;
use lattice_utils::{DetailType, StatType, Stats};
use tokio::sync::{broadcast, mpsc};

use crate::block_processor::{BlockProcessor, BlockSource};
use crate::bootstrap::{BootstrapAscending, BootstrapConnections, BootstrapServer};
use crate::telemetry::Telemetry;

/// Starts an outbound realtime connection to a peer learned from a keepalive.
pub type PeerConnector = Box<dyn Fn(SocketAddrV6) + Send + Sync>;

pub struct MessageProcessor {
    pub(crate) network: Arc<Network>,
    pub(crate) block_processor: Arc<BlockProcessor>,
    pub(crate) vote_processor: Arc<VoteProcessor>,
    pub(crate) rep_crawler: Arc<RepCrawler>,
    pub(crate) aggregator: Arc<RequestAggregator>,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) bootstrap_server: Arc<BootstrapServer>,
    pub(crate) connections: Arc<BootstrapConnections>,
    pub(crate) ascending: Arc<BootstrapAscending>,
    pub(crate) connector: PeerConnector,
    pub(crate) own_endpoint: Option<SocketAddrV6>,
    pub(crate) keepalive_connects: usize,
    pub(crate) stats: Arc<Stats>,
}

impl MessageProcessor {
    /// Drain the listener's sink until shutdown or until every sender is gone.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::debug!("message processor shutting down");
                    break;
                }
                received = inbound.recv() => match received {
                    Some(InboundMessage { message, channel }) => self.process(message, &channel),
                    None => break,
                },
            }
        }
    }

    pub fn process(&self, message: Message, channel: &Arc<dyn Channel>) {
        match message {
            Message::Keepalive(keepalive) => {
                let fresh = keepalive.endpoints().filter(|endpoint| {
                    Some(**endpoint) != self.own_endpoint
                        && self.network.find_endpoint(endpoint).is_none()
                });
                for endpoint in fresh.take(self.keepalive_connects) {
                    (self.connector)(*endpoint);
                }
            }
            Message::Publish(publish) => {
                let source = if publish.is_originator {
                    BlockSource::LiveOriginator
                } else {
                    BlockSource::Live
                };
                if !self.block_processor.add(publish.block, source) {
                    self.stats.inc(StatType::Message, DetailType::Drop);
                }
            }
            Message::ConfirmReq(req) => {
                if !self
                    .aggregator
                    .request(req.roots_hashes, Arc::clone(channel))
                {
                    self.stats.inc(StatType::Message, DetailType::Drop);
                }
            }
            Message::ConfirmAck(ack) => {
                let vote: Arc<Vote> = Arc::new(ack.vote);
                self.rep_crawler.process(&vote, channel);
                self.vote_processor.vote(vote, Some(Arc::clone(channel)));
            }
            Message::TelemetryReq => self.telemetry.process_request(&**channel),
            Message::TelemetryAck(data) => {
                self.telemetry.process_ack(data, &**channel);
            }
            message @ (Message::FrontierReq(_)
            | Message::BulkPull(_)
            | Message::BulkPullAccount(_)
            | Message::BulkPush(_)
            | Message::AscPullReq(_)) => {
                self.bootstrap_server.request(message, Arc::clone(channel));
            }
            message @ (Message::FrontierResp(_)
            | Message::BulkPullResp(_)
            | Message::BulkPullAccountResp(_)) => {
                if !self.connections.deliver(channel.channel_id(), message) {
                    self.stats
                        .inc(StatType::Bootstrap, DetailType::ResponseUnsolicited);
                }
            }
            Message::AscPullAck(ack) => self.ascending.process(ack, channel),
            Message::NodeIdHandshake(_) => {
                // Handshakes are consumed by the listener before a channel exists.
                self.stats.inc(StatType::Message, DetailType::InvalidMessage);
            }
        }
    }
}
