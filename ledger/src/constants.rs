//! Per-network ledger constants: genesis, epochs and work thresholds.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_crypto::{deterministic_key, sign_block};
use lattice_types::{
    Account, Amount, Block, BlockDetails, BlockHash, BlockSideband, Epoch, KeyPair, Link,
    NetworkId, OpenBlock, SavedBlock, Signature,
};
use lattice_work::WorkThresholds;

/// Registered epoch upgrade links and who may sign them.
#[derive(Clone, Debug, Default)]
pub struct Epochs {
    links: HashMap<Epoch, (Link, Account)>,
}

impl Epochs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, epoch: Epoch, signer: Account, link: Link) {
        self.links.insert(epoch, (link, signer));
    }

    pub fn is_epoch_link(&self, link: &Link) -> bool {
        self.links.values().any(|(l, _)| l == link)
    }

    pub fn link(&self, epoch: Epoch) -> Option<Link> {
        self.links.get(&epoch).map(|(link, _)| *link)
    }

    pub fn signer(&self, epoch: Epoch) -> Option<Account> {
        self.links.get(&epoch).map(|(_, signer)| *signer)
    }

    pub fn epoch(&self, link: &Link) -> Option<Epoch> {
        self.links
            .iter()
            .find(|(_, (l, _))| l == link)
            .map(|(epoch, _)| *epoch)
    }
}

/// Link of an epoch upgrade: the ASCII label zero-padded to 32 bytes.
pub fn epoch_link(label: &str) -> Link {
    let mut bytes = [0u8; 32];
    let len = label.len().min(32);
    bytes[..len].copy_from_slice(&label.as_bytes()[..len]);
    Link::new(bytes)
}

fn genesis_seed(network: NetworkId) -> [u8; 32] {
    let mut seed = [0u8; 32];
    let label = format!("lattice {} genesis", network.as_str());
    seed[..label.len()].copy_from_slice(label.as_bytes());
    seed
}

#[derive(Clone)]
pub struct LedgerConstants {
    pub network: NetworkId,
    pub work: WorkThresholds,
    /// Signing key of the genesis account. Only meaningful outside live.
    pub genesis_key: Arc<KeyPair>,
    pub genesis: SavedBlock,
    pub genesis_account: Account,
    pub genesis_amount: Amount,
    pub burn_account: Account,
    pub epochs: Epochs,
}

impl LedgerConstants {
    pub fn new(network: NetworkId) -> Self {
        let work = match network {
            NetworkId::Live => WorkThresholds::publish_full(),
            NetworkId::Test => WorkThresholds::publish_beta(),
            NetworkId::Dev => WorkThresholds::publish_dev(),
        };
        let genesis_key = deterministic_key(&genesis_seed(network), 0);
        let genesis_account = genesis_key.account();
        let genesis_amount = Amount::MAX;

        let mut block = Block::Open(OpenBlock {
            source: BlockHash::new(*genesis_account.as_bytes()),
            representative: genesis_account,
            account: genesis_account,
            signature: Signature::default(),
            work: 0,
        });
        sign_block(&mut block, &genesis_key.private);
        let genesis = SavedBlock::new(
            block,
            BlockSideband {
                account: genesis_account,
                successor: BlockHash::ZERO,
                balance: genesis_amount,
                height: 1,
                timestamp: 0,
                details: BlockDetails::new(Epoch::Epoch0, false, false, false),
                source_epoch: Epoch::Epoch0,
            },
        );

        let mut epochs = Epochs::new();
        epochs.add(Epoch::Epoch1, genesis_account, epoch_link("epoch v1 block"));
        epochs.add(Epoch::Epoch2, genesis_account, epoch_link("epoch v2 block"));

        Self {
            network,
            work,
            genesis_key: Arc::new(genesis_key),
            genesis,
            genesis_account,
            genesis_amount,
            burn_account: Account::ZERO,
            epochs,
        }
    }

    pub fn dev() -> Self {
        Self::new(NetworkId::Dev)
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.genesis.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crypto::validate_block_signature;

    #[test]
    fn genesis_is_signed_by_its_account() {
        let constants = LedgerConstants::dev();
        assert!(validate_block_signature(
            &constants.genesis.block,
            &constants.genesis_account.into()
        ));
        assert_eq!(constants.genesis.account(), constants.genesis_account);
    }

    #[test]
    fn networks_have_distinct_genesis() {
        let dev = LedgerConstants::new(NetworkId::Dev);
        let live = LedgerConstants::new(NetworkId::Live);
        assert_ne!(dev.genesis_hash(), live.genesis_hash());
    }

    #[test]
    fn epoch_links_resolve() {
        let epochs = LedgerConstants::dev().epochs;
        let v2 = epoch_link("epoch v2 block");
        assert!(epochs.is_epoch_link(&v2));
        assert_eq!(epochs.epoch(&v2), Some(Epoch::Epoch2));
        assert!(!epochs.is_epoch_link(&Link::new([1; 32])));
    }
}
