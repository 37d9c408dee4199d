//! Builds valid, signed and worked blocks for tests without touching a ledger.
//!
//! The builder tracks every account frontier and outstanding send itself, so
//! a sequence of calls describes the lattice the blocks will produce once
//! processed in the same order.

use std::collections::HashMap;

use lattice_crypto::{keypair_from_private, sign_block};
use lattice_types::{
    Account, Amount, Block, BlockHash, ChangeBlock, Epoch, KeyPair, Link, OpenBlock,
    PrivateKey, ReceiveBlock, Root, SendBlock, Signature, StateBlock,
};
use lattice_work::{WorkGenerator, WorkThresholds};

use crate::constants::{Epochs, LedgerConstants};

#[derive(Clone)]
struct Frontier {
    hash: BlockHash,
    representative: Account,
    balance: Amount,
}

pub struct LatticeBuilder {
    accounts: HashMap<Account, Frontier>,
    /// Unreceived sends: hash → (destination, amount).
    pending: HashMap<BlockHash, (Account, Amount)>,
    genesis_private: [u8; 32],
    epochs: Epochs,
    work: WorkThresholds,
}

impl LatticeBuilder {
    pub fn new(constants: &LedgerConstants) -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            constants.genesis_account,
            Frontier {
                hash: constants.genesis_hash(),
                representative: constants.genesis_account,
                balance: constants.genesis_amount,
            },
        );
        Self {
            accounts,
            pending: HashMap::new(),
            genesis_private: constants.genesis_key.private.0,
            epochs: constants.epochs.clone(),
            work: constants.work.clone(),
        }
    }

    pub fn genesis(&mut self) -> AccountChainBuilder<'_> {
        let key = keypair_from_private(PrivateKey(self.genesis_private));
        AccountChainBuilder { lattice: self, key }
    }

    pub fn account(&mut self, key: &KeyPair) -> AccountChainBuilder<'_> {
        let key = keypair_from_private(PrivateKey(key.private.0));
        AccountChainBuilder { lattice: self, key }
    }

    /// Open `account` with an epoch block signed by the epoch signer.
    pub fn epoch_open(&mut self, account: Account, epoch: Epoch) -> Block {
        assert!(
            !self.accounts.contains_key(&account),
            "epoch open of an opened account"
        );
        let mut block = Block::State(StateBlock {
            account,
            previous: BlockHash::ZERO,
            representative: Account::ZERO,
            balance: Amount::ZERO,
            link: self.epoch_link(epoch),
            signature: Signature::default(),
            work: 0,
        });
        self.finish(&mut block, &self.genesis_key());
        self.accounts.insert(
            account,
            Frontier {
                hash: block.hash(),
                representative: Account::ZERO,
                balance: Amount::ZERO,
            },
        );
        block
    }

    fn genesis_key(&self) -> KeyPair {
        keypair_from_private(PrivateKey(self.genesis_private))
    }

    fn epoch_link(&self, epoch: Epoch) -> Link {
        self.epochs
            .link(epoch)
            .unwrap_or_else(|| panic!("no link registered for {epoch:?}"))
    }

    fn finish(&self, block: &mut Block, key: &KeyPair) {
        let root: Root = block.root();
        let work = WorkGenerator
            .generate(&root, self.work.threshold_max())
            .unwrap_or_else(|e| panic!("work generation failed: {e}"));
        block.set_work(work.0);
        sign_block(block, &key.private);
    }
}

pub struct AccountChainBuilder<'a> {
    lattice: &'a mut LatticeBuilder,
    key: KeyPair,
}

impl AccountChainBuilder<'_> {
    pub fn account(&self) -> Account {
        self.key.account()
    }

    pub fn send(&mut self, destination: Account, amount: Amount) -> Block {
        let frontier = self.frontier();
        let balance = frontier.balance - amount;
        let block = self.state(frontier.hash, frontier.representative, balance, destination.into());
        self.lattice.pending.insert(block.hash(), (destination, amount));
        self.advance(&block, frontier.representative, balance);
        block
    }

    /// Send everything except `keep`.
    pub fn send_all_except(&mut self, destination: Account, keep: Amount) -> Block {
        let amount = self.frontier().balance - keep;
        self.send(destination, amount)
    }

    pub fn receive(&mut self, send: &Block) -> Block {
        let amount = self.take_pending(send);
        let frontier = self.frontier_or_empty();
        let balance = frontier.balance + amount;
        let block = self.state(
            frontier.hash,
            frontier.representative,
            balance,
            send.hash().into(),
        );
        self.advance(&block, frontier.representative, balance);
        block
    }

    pub fn change(&mut self, representative: Account) -> Block {
        let frontier = self.frontier();
        let block = self.state(frontier.hash, representative, frontier.balance, Link::ZERO);
        self.advance(&block, representative, frontier.balance);
        block
    }

    /// Upgrade this account to `epoch`.
    pub fn epoch(&mut self, epoch: Epoch) -> Block {
        let frontier = self.frontier();
        let mut block = Block::State(StateBlock {
            account: self.account(),
            previous: frontier.hash,
            representative: frontier.representative,
            balance: frontier.balance,
            link: self.lattice.epoch_link(epoch),
            signature: Signature::default(),
            work: 0,
        });
        let signer = self.lattice.genesis_key();
        self.lattice.finish(&mut block, &signer);
        self.advance(&block, frontier.representative, frontier.balance);
        block
    }

    pub fn legacy_send(&mut self, destination: Account, amount: Amount) -> Block {
        let frontier = self.frontier();
        let balance = frontier.balance - amount;
        let mut block = Block::Send(SendBlock {
            previous: frontier.hash,
            destination,
            balance,
            signature: Signature::default(),
            work: 0,
        });
        self.lattice.finish(&mut block, &self.key);
        self.lattice.pending.insert(block.hash(), (destination, amount));
        self.advance(&block, frontier.representative, balance);
        block
    }

    pub fn legacy_receive(&mut self, send: &Block) -> Block {
        let amount = self.take_pending(send);
        let frontier = self.frontier();
        let mut block = Block::Receive(ReceiveBlock {
            previous: frontier.hash,
            source: send.hash(),
            signature: Signature::default(),
            work: 0,
        });
        self.lattice.finish(&mut block, &self.key);
        self.advance(&block, frontier.representative, frontier.balance + amount);
        block
    }

    pub fn legacy_open(&mut self, send: &Block) -> Block {
        let amount = self.take_pending(send);
        let account = self.account();
        let mut block = Block::Open(OpenBlock {
            source: send.hash(),
            representative: account,
            account,
            signature: Signature::default(),
            work: 0,
        });
        self.lattice.finish(&mut block, &self.key);
        self.advance(&block, account, amount);
        block
    }

    pub fn legacy_change(&mut self, representative: Account) -> Block {
        let frontier = self.frontier();
        let mut block = Block::Change(ChangeBlock {
            previous: frontier.hash,
            representative,
            signature: Signature::default(),
            work: 0,
        });
        self.lattice.finish(&mut block, &self.key);
        self.advance(&block, representative, frontier.balance);
        block
    }

    fn state(
        &self,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
    ) -> Block {
        let mut block = Block::State(StateBlock {
            account: self.account(),
            previous,
            representative,
            balance,
            link,
            signature: Signature::default(),
            work: 0,
        });
        self.lattice.finish(&mut block, &self.key);
        block
    }

    fn take_pending(&mut self, send: &Block) -> Amount {
        let (destination, amount) = self
            .lattice
            .pending
            .remove(&send.hash())
            .unwrap_or_else(|| panic!("nothing to receive from {}", send.hash()));
        assert_eq!(destination, self.account(), "send is for another account");
        amount
    }

    fn advance(&mut self, block: &Block, representative: Account, balance: Amount) {
        self.lattice.accounts.insert(
            self.account(),
            Frontier {
                hash: block.hash(),
                representative,
                balance,
            },
        );
    }

    fn frontier(&self) -> Frontier {
        self.lattice
            .accounts
            .get(&self.account())
            .cloned()
            .unwrap_or_else(|| panic!("account {} is not opened", self.account()))
    }

    fn frontier_or_empty(&self) -> Frontier {
        self.lattice
            .accounts
            .get(&self.account())
            .cloned()
            .unwrap_or(Frontier {
                hash: BlockHash::ZERO,
                representative: self.account(),
                balance: Amount::ZERO,
            })
    }
}
