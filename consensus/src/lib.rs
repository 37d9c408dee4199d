//! Consensus: elections over conflicting blocks, settled by representative
//! voting.
//!
//! Every account delegates its balance to a representative. An election
//! confirms a block once the weight voting for it leads the runner-up by the
//! quorum delta (67% of online weight) and enough of that weight is final.
//!
//! ## Module overview
//!
//! - [`election`]: per-root state machine and tally.
//! - [`active_elections`]: the container of running elections and its
//!   request loop.
//! - [`confirmation_solicitor`]: batches confirm_req and block rebroadcasts.
//! - [`vote_processor`]: verifies and applies incoming votes.
//! - [`vote_generator`]: signs normal and final votes for local
//!   representatives.
//! - [`request_aggregator`]: answers confirm_req from peers.
//! - [`rep_crawler`], [`representative_register`], [`rep_tiers`],
//!   [`online_reps`]: who the representatives are and how much weight is
//!   online.
//! - [`scheduler`]: decides which blocks get elections.
//! - [`vote_cache`], [`recently_confirmed`], [`local_vote_history`],
//!   [`vote_spacing`]: bounded bookkeeping around votes.

pub mod active_elections;
pub mod config;
pub mod confirmation_solicitor;
pub mod election;
pub mod error;
pub mod local_vote_history;
pub mod online_reps;
pub mod recently_confirmed;
pub mod rep_crawler;
pub mod rep_tiers;
pub mod representative_register;
pub mod request_aggregator;
pub mod scheduler;
pub mod vote_cache;
pub mod vote_generator;
pub mod vote_processor;
pub mod vote_spacing;

#[cfg(test)]
mod testing;

pub use active_elections::ActiveElections;
pub use config::{
    ActiveElectionsConfig, HintedSchedulerConfig, OnlineRepsConfig, OptimisticSchedulerConfig,
    PrioritySchedulerConfig, RepCrawlerConfig, RequestAggregatorConfig, VoteCacheConfig,
    VoteProcessorConfig,
};
pub use confirmation_solicitor::ConfirmationSolicitor;
pub use election::{Election, ElectionBehavior, ElectionState, ElectionStatus};
pub use error::ConsensusError;
pub use local_vote_history::LocalVoteHistory;
pub use online_reps::OnlineReps;
pub use recently_confirmed::RecentlyConfirmed;
pub use rep_crawler::RepCrawler;
pub use rep_tiers::{RepTier, RepTiers};
pub use representative_register::{PeeredRep, RegisterResult, RepresentativeRegister};
pub use request_aggregator::RequestAggregator;
pub use scheduler::{
    ElectionSchedulers, HintedScheduler, ManualScheduler, OptimisticScheduler, PriorityScheduler,
};
pub use vote_cache::VoteCache;
pub use vote_generator::{LocalRepresentatives, VoteGenerator};
pub use vote_processor::VoteProcessor;
pub use vote_spacing::VoteSpacing;
