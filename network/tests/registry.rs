use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_messages::{Keepalive, Message};
use lattice_network::{
    Channel, ChannelMode, ConnectionDirection, ConnectionLimits, DropPolicy, Network,
};
use lattice_nullables::NullChannel;
use lattice_types::{Account, NetworkConstants};
use lattice_utils::{DetailType, Direction, StatType, Stats};

fn network() -> (Network, Arc<Stats>) {
    let stats = Arc::new(Stats::new());
    let limits = ConnectionLimits {
        max_inbound: 16,
        max_peers_per_ip: 4,
        max_peers_per_subnetwork: 8,
        allow_local_peers: true,
    };
    (
        Network::new(NetworkConstants::dev(), limits, Arc::clone(&stats)),
        stats,
    )
}

fn add(network: &Network, channel: &Arc<NullChannel>) -> bool {
    let channel: Arc<dyn Channel> = channel.clone();
    network.add(channel, ConnectionDirection::Outbound)
}

#[test]
fn duplicate_node_id_is_refused() {
    let (network, stats) = network();
    let first = NullChannel::new(1);
    let second = NullChannel::new(2);
    first.set_node_id(Account::new([1; 32]));
    second.set_node_id(Account::new([1; 32]));

    assert!(add(&network, &first));
    assert!(!add(&network, &second));
    assert_eq!(network.count(), 1);
    assert_eq!(stats.count(StatType::Tcp, DetailType::Duplicate, Direction::In), 1);

    // Once the first dies, the node may reconnect.
    first.close();
    assert!(add(&network, &second));
}

#[test]
fn list_only_returns_live_realtime_channels() {
    let (network, _) = network();
    let live = NullChannel::new(1);
    let bootstrap = NullChannel::new(2);
    let dead = NullChannel::new(3);
    bootstrap.set_mode(ChannelMode::Bootstrap);
    dead.close();
    for channel in [&live, &bootstrap, &dead] {
        add(&network, channel);
    }
    let listed = network.list(0);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].channel_id(), live.channel_id());
    assert!(network.find_endpoint(&live.remote_endpoint()).is_some());
    assert!(network.find_endpoint(&dead.remote_endpoint()).is_none());
}

#[test]
fn flood_reaches_square_root_of_peers() {
    let (network, _) = network();
    let channels: Vec<_> = (1..=16).map(NullChannel::new).collect();
    for channel in &channels {
        add(&network, channel);
    }
    assert_eq!(network.fanout(1.0), 4);
    assert_eq!(network.fanout(2.0), 8);

    let message = Message::Keepalive(Keepalive::default());
    assert_eq!(network.flood(&message, DropPolicy::CanDrop, 1.0), 4);
    let reached = channels.iter().filter(|c| !c.sent().is_empty()).count();
    assert_eq!(reached, 4);
}

#[test]
fn purge_closes_idle_and_silent_channels() {
    let (network, stats) = network();
    let constants = NetworkConstants::dev();
    let now = Instant::now();
    let fresh = NullChannel::new(1);
    let idle = NullChannel::new(2);
    let silent = NullChannel::new(3);
    for channel in [&fresh, &idle, &silent] {
        add(&network, channel);
        channel.set_last_packet_received(now);
        channel.set_last_packet_sent(now);
    }
    let later = now + constants.silent_connection_tolerance_time + Duration::from_secs(1);
    fresh.set_last_packet_received(later);
    fresh.set_last_packet_sent(later);
    // Silent: we keep talking, they never answer.
    silent.set_last_packet_sent(later);

    network.purge_at(later);

    assert!(fresh.is_alive());
    assert!(!idle.is_alive());
    assert!(!silent.is_alive());
    assert_eq!(network.count(), 1);
    assert_eq!(stats.count(StatType::Tcp, DetailType::IdleTimeout, Direction::In), 1);
    assert_eq!(stats.count(StatType::Tcp, DetailType::SilentTimeout, Direction::In), 1);
}

#[test]
fn repeated_misbehaviour_excludes_peer() {
    let (network, _) = network();
    let channel = NullChannel::new(1);
    add(&network, &channel);

    network.exclude(&*channel);
    assert!(channel.is_alive());
    network.exclude(&*channel);
    assert!(!channel.is_alive());
    assert!(network.is_excluded(&channel.remote_endpoint()));
    assert!(network
        .check_limits(&channel.remote_endpoint(), ConnectionDirection::Inbound)
        .is_err());
}

#[test]
fn keepalive_only_goes_to_quiet_channels() {
    let (network, _) = network();
    let quiet = NullChannel::new(1);
    let busy = NullChannel::new(2);
    add(&network, &quiet);
    add(&network, &busy);
    quiet.set_last_packet_sent(Instant::now() - Duration::from_secs(10));

    network.keepalive();

    assert_eq!(quiet.sent().len(), 1);
    assert!(busy.sent().is_empty());
    match &quiet.sent()[0] {
        Message::Keepalive(keepalive) => assert_eq!(keepalive.endpoints().count(), 2),
        other => panic!("unexpected message {other:?}"),
    }
}
