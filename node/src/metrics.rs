//! Prometheus metrics.
//!
//! [`NodeMetrics`] owns its own [`Registry`]; the node refreshes the gauges
//! from the ledger and the engines on every maintenance tick.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

pub struct NodeMetrics {
    pub registry: Registry,

    // Counters
    pub blocks_processed: IntCounter,
    pub blocks_cemented: IntCounter,
    pub votes_processed: IntCounter,

    // Gauges
    pub block_count: IntGauge,
    pub cemented_count: IntGauge,
    pub account_count: IntGauge,
    pub unchecked_count: IntGauge,
    pub active_elections: IntGauge,
    pub peer_count: IntGauge,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let blocks_processed = register_int_counter_with_registry!(
            Opts::new("lattice_blocks_processed_total", "Blocks run through the ledger"),
            registry
        )?;
        let blocks_cemented = register_int_counter_with_registry!(
            Opts::new("lattice_blocks_cemented_total", "Blocks cemented by this node"),
            registry
        )?;
        let votes_processed = register_int_counter_with_registry!(
            Opts::new("lattice_votes_processed_total", "Votes verified and applied"),
            registry
        )?;

        let block_count = register_int_gauge_with_registry!(
            Opts::new("lattice_block_count", "Blocks in the ledger"),
            registry
        )?;
        let cemented_count = register_int_gauge_with_registry!(
            Opts::new("lattice_cemented_count", "Blocks at or below confirmation height"),
            registry
        )?;
        let account_count = register_int_gauge_with_registry!(
            Opts::new("lattice_account_count", "Opened accounts"),
            registry
        )?;
        let unchecked_count = register_int_gauge_with_registry!(
            Opts::new("lattice_unchecked_count", "Blocks waiting for a dependency"),
            registry
        )?;
        let active_elections = register_int_gauge_with_registry!(
            Opts::new("lattice_active_elections", "Running elections"),
            registry
        )?;
        let peer_count = register_int_gauge_with_registry!(
            Opts::new("lattice_peer_count", "Realtime peer channels"),
            registry
        )?;

        Ok(Self {
            registry,
            blocks_processed,
            blocks_cemented,
            votes_processed,
            block_count,
            cemented_count,
            account_count,
            unchecked_count,
            active_elections,
            peer_count,
        })
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
