//! TCP accept loop, outbound connects and the node-id handshake.
//!
//! Every connection, in either direction, starts with a cookie exchange:
//! the initiator sends a query, the acceptor answers with a signed response
//! and its own query, and the initiator closes the exchange with its
//! signed response. Only then is the connection wrapped in a channel and
//! its read loop started.

use std::net::{IpAddr, Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use lattice_messages::{Message, NodeIdHandshake, NodeIdHandshakeResponse};
use lattice_protocol::{read_message, sign_cookie, write_message, MessageCodec, ProtocolError};
use lattice_types::{Account, KeyPair};
use lattice_utils::{DetailType, Direction as StatDirection, StatType, Stats};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, TcpListener as TokioTcpListener};
use tokio::sync::{broadcast, mpsc};

use crate::channel::{message_detail, Channel, ChannelMode};
use crate::error::NetworkError;
use crate::limits::{map_to_v6, to_socket_addr, Direction};
use crate::network::Network;
use crate::tcp_channel::{TcpChannel, DEFAULT_QUEUE_SIZE};

/// A message read from a peer, with the channel it arrived on.
pub struct InboundMessage {
    pub message: Message,
    pub channel: Arc<dyn Channel>,
}

pub type MessageSink = mpsc::Sender<InboundMessage>;

#[derive(Clone, Debug)]
pub struct TcpListenerConfig {
    pub listen_address: IpAddr,
    pub port: u16,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_queue: usize,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            port: 0,
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            max_queue: DEFAULT_QUEUE_SIZE,
        }
    }
}

pub struct TcpListener {
    network: Arc<Network>,
    node_key: Arc<KeyPair>,
    codec: MessageCodec,
    stats: Arc<Stats>,
    config: TcpListenerConfig,
    sink: MessageSink,
}

impl TcpListener {
    pub fn new(
        network: Arc<Network>,
        node_key: Arc<KeyPair>,
        stats: Arc<Stats>,
        config: TcpListenerConfig,
        sink: MessageSink,
    ) -> Arc<Self> {
        let codec = MessageCodec::new(network.constants.network);
        Arc::new(Self {
            network,
            node_key,
            codec,
            stats,
            config,
            sink,
        })
    }

    pub fn node_id(&self) -> Account {
        self.node_key.account()
    }

    pub async fn bind(&self) -> Result<TokioTcpListener, NetworkError> {
        let listener = TokioTcpListener::bind((self.config.listen_address, self.config.port)).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening for peers");
        Ok(listener)
    }

    /// Accept connections until shutdown.
    pub async fn run(self: Arc<Self>, listener: TokioTcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            this.accept(stream, map_to_v6(addr)).await;
                        });
                    }
                    Err(e) => {
                        self.stats.inc_dir(StatType::TcpListener, DetailType::AcceptFailure, StatDirection::In);
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("listener stopped");
    }

    async fn accept(self: Arc<Self>, stream: TcpStream, remote: SocketAddrV6) {
        if let Err(reason) = self.network.check_limits(&remote, Direction::Inbound) {
            tracing::debug!(peer = %remote, reason, "inbound connection refused");
            return;
        }
        match tokio::time::timeout(self.config.handshake_timeout, self.handshake_inbound(stream, remote)).await {
            Ok(Ok((channel, reader))) => {
                self.stats.inc_dir(StatType::TcpListener, DetailType::AcceptSuccess, StatDirection::In);
                self.start_inbound(channel, reader);
            }
            Ok(Err(e)) => {
                self.stats.inc_dir(StatType::Handshake, DetailType::AcceptFailure, StatDirection::In);
                tracing::debug!(peer = %remote, error = %e, "inbound handshake failed");
            }
            Err(_) => {
                self.stats.inc_dir(StatType::Handshake, DetailType::AcceptFailure, StatDirection::In);
                tracing::debug!(peer = %remote, "inbound handshake timed out");
            }
        }
    }

    async fn handshake_inbound(
        &self,
        stream: TcpStream,
        remote: SocketAddrV6,
    ) -> Result<(Arc<TcpChannel>, OwnedReadHalf), NetworkError> {
        let (mut reader, mut writer) = stream.into_split();

        let their_cookie = match read_message(&mut reader, &self.codec).await? {
            Message::NodeIdHandshake(NodeIdHandshake { query: Some(cookie), .. }) => cookie,
            other => {
                return Err(NetworkError::HandshakeFailed(format!(
                    "expected handshake query, got {}",
                    other.message_type().as_str()
                )))
            }
        };
        let our_cookie = self.assign_cookie(remote)?;
        let reply = NodeIdHandshake::response(sign_cookie(&their_cookie, &self.node_key), Some(our_cookie));
        write_message(&mut writer, &self.codec, &Message::NodeIdHandshake(reply)).await?;

        let response = match read_message(&mut reader, &self.codec).await? {
            Message::NodeIdHandshake(NodeIdHandshake { response: Some(response), .. }) => response,
            _ => return Err(NetworkError::HandshakeFailed("expected handshake response".into())),
        };
        self.validate_response(&remote, &response)?;

        let channel = TcpChannel::new(
            self.network.next_channel_id(),
            remote,
            Direction::Inbound,
            self.codec,
            Arc::clone(&self.stats),
            self.config.max_queue,
        );
        channel.set_node_id(response.node_id);
        channel.spawn_writer(writer);
        Ok((channel, reader))
    }

    /// Connect to `endpoint` and run the handshake.
    ///
    /// Realtime channels join the network registry; bootstrap channels are
    /// returned to the caller only.
    pub async fn connect(
        self: &Arc<Self>,
        endpoint: SocketAddrV6,
        mode: ChannelMode,
    ) -> Result<Arc<TcpChannel>, NetworkError> {
        if let Err(reason) = self.network.check_limits(&endpoint, Direction::Outbound) {
            return Err(NetworkError::Refused(reason));
        }
        let result = tokio::time::timeout(self.config.connect_timeout, self.handshake_outbound(endpoint)).await;
        let (channel, reader) = match result {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                self.stats.inc_dir(StatType::Tcp, DetailType::ConnectFailure, StatDirection::Out);
                return Err(e);
            }
            Err(_) => {
                self.stats.inc_dir(StatType::Tcp, DetailType::ConnectFailure, StatDirection::Out);
                return Err(NetworkError::ConnectionFailed(format!("{endpoint}: timed out")));
            }
        };
        self.stats.inc_dir(StatType::Tcp, DetailType::ConnectSuccess, StatDirection::Out);
        channel.set_mode(mode);
        if mode == ChannelMode::Realtime {
            let dyn_channel: Arc<dyn Channel> = channel.clone();
            if !self.network.add(dyn_channel, Direction::Outbound) {
                channel.close();
                return Err(NetworkError::Refused("node already connected"));
            }
        }
        self.spawn_read_loop(channel.clone(), reader);
        Ok(channel)
    }

    async fn handshake_outbound(
        &self,
        endpoint: SocketAddrV6,
    ) -> Result<(Arc<TcpChannel>, OwnedReadHalf), NetworkError> {
        let stream = TcpStream::connect(to_socket_addr(endpoint))
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{endpoint}: {e}")))?;
        let (mut reader, mut writer) = stream.into_split();

        let our_cookie = self.assign_cookie(endpoint)?;
        let query = Message::NodeIdHandshake(NodeIdHandshake::query(our_cookie));
        write_message(&mut writer, &self.codec, &query).await?;

        let (response, their_cookie) = match read_message(&mut reader, &self.codec).await? {
            Message::NodeIdHandshake(NodeIdHandshake {
                response: Some(response),
                query: Some(cookie),
            }) => (response, cookie),
            _ => return Err(NetworkError::HandshakeFailed("expected handshake response and query".into())),
        };
        self.validate_response(&endpoint, &response)?;

        let reply = NodeIdHandshake::response(sign_cookie(&their_cookie, &self.node_key), None);
        write_message(&mut writer, &self.codec, &Message::NodeIdHandshake(reply)).await?;

        let channel = TcpChannel::new(
            self.network.next_channel_id(),
            endpoint,
            Direction::Outbound,
            self.codec,
            Arc::clone(&self.stats),
            self.config.max_queue,
        );
        channel.set_node_id(response.node_id);
        channel.spawn_writer(writer);
        Ok((channel, reader))
    }

    fn assign_cookie(&self, endpoint: SocketAddrV6) -> Result<[u8; 32], NetworkError> {
        self.network
            .syn_cookies
            .lock()
            .unwrap()
            .assign(endpoint)
            .ok_or_else(|| NetworkError::HandshakeFailed("no cookie available for endpoint".into()))
    }

    fn validate_response(
        &self,
        endpoint: &SocketAddrV6,
        response: &NodeIdHandshakeResponse,
    ) -> Result<(), NetworkError> {
        if response.node_id == self.node_id() {
            return Err(NetworkError::HandshakeFailed("connected to self".into()));
        }
        if !self.network.syn_cookies.lock().unwrap().validate(endpoint, response) {
            self.stats.inc(StatType::Handshake, DetailType::InvalidMessage);
            return Err(NetworkError::HandshakeFailed("invalid cookie signature".into()));
        }
        Ok(())
    }

    /// The first message decides whether an inbound connection serves
    /// bootstrap requests or realtime traffic.
    fn start_inbound(self: &Arc<Self>, channel: Arc<TcpChannel>, mut reader: OwnedReadHalf) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let first = match read_message(&mut reader, &this.codec).await {
                Ok(message) => message,
                Err(e) => {
                    this.on_read_error(&*channel, &e);
                    channel.close();
                    return;
                }
            };
            if first.is_bootstrap_request() {
                channel.set_mode(ChannelMode::Bootstrap);
            } else {
                channel.set_mode(ChannelMode::Realtime);
                let dyn_channel: Arc<dyn Channel> = channel.clone();
                if !this.network.add(dyn_channel, Direction::Inbound) {
                    channel.close();
                    return;
                }
            }
            if this.dispatch(&channel, first).await {
                this.read_loop(channel, reader).await;
            }
        });
    }

    fn spawn_read_loop(self: &Arc<Self>, channel: Arc<TcpChannel>, reader: OwnedReadHalf) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.read_loop(channel, reader).await;
        });
    }

    async fn read_loop(&self, channel: Arc<TcpChannel>, mut reader: OwnedReadHalf) {
        while channel.is_alive() {
            match read_message(&mut reader, &self.codec).await {
                Ok(message) => {
                    if !self.dispatch(&channel, message).await {
                        break;
                    }
                }
                Err(e) => {
                    self.on_read_error(&*channel, &e);
                    break;
                }
            }
        }
        channel.close();
        self.network.remove(channel.channel_id());
    }

    /// Forward one message to the sink. Returns false once the sink is gone.
    async fn dispatch(&self, channel: &Arc<TcpChannel>, message: Message) -> bool {
        channel.touch();
        self.stats.inc_dir(
            StatType::Message,
            message_detail(message.message_type()),
            StatDirection::In,
        );
        if message.is_filterable() {
            if let Ok(frame) = self.codec.encode(&message) {
                let (_, duplicate) = self.network.filter.apply(&frame);
                if duplicate {
                    self.stats.inc(StatType::Filter, DetailType::Duplicate);
                    return true;
                }
            }
        }
        let channel: Arc<dyn Channel> = channel.clone();
        self.sink.send(InboundMessage { message, channel }).await.is_ok()
    }

    fn on_read_error(&self, channel: &dyn Channel, error: &ProtocolError) {
        match error {
            ProtocolError::Io(_) => {
                tracing::trace!(peer = %channel.remote_endpoint(), "connection closed");
            }
            ProtocolError::WrongNetwork => {
                self.stats.inc(StatType::Message, DetailType::InvalidNetwork);
                self.network.exclude(channel);
            }
            ProtocolError::UnsupportedVersion(_) => {
                self.stats.inc(StatType::Message, DetailType::OutdatedVersion);
            }
            other => {
                self.stats.inc(StatType::Message, DetailType::InvalidMessage);
                tracing::debug!(peer = %channel.remote_endpoint(), error = %other, "invalid message");
                self.network.exclude(channel);
            }
        }
    }
}
