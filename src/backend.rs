/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The bridge between the consensus core and the rest of the node.
//!
//! The core sees the outside world only through the [`Backend`] capability: signing, validator
//! roster lookups, message delivery, proposal verification, sealing, and committing. The
//! concrete [`ConsensusBackend`] implements it over two narrow adapters supplied by the node:
//! [`Transport`] (the P2P layer) and [`ChainReader`] (chain storage).
//!
//! ## Engine ↔ backend wiring
//!
//! The backend is constructed first with an empty core slot; after
//! [`start_core`](crate::engine::start_core) spawns the engine, the returned
//! [`CoreHandle`](crate::engine::CoreHandle) is injected with
//! [`attach_core`](ConsensusBackend::attach_core). The backend owns the handle; the core holds
//! only the `Backend` capability. No ownership cycle exists.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::engine::{CoreEvent, CoreHandle};
use crate::errors::ConsensusError;
use crate::signer::{self, write_committed_seals, Signer};
use crate::types::block::{derive_tx_root, Block, Header};
use crate::types::certificates::QuorumCert;
use crate::types::crypto_primitives::keccak256;
use crate::types::data_types::{Address, BlockHeight, Hash, SignatureBytes, View};
use crate::types::validator_set::ValidatorSet;

/// Capacity of the self-known-message ring.
const KNOWN_MESSAGES: usize = 1024;
/// Capacity of each per-peer recent-message ring.
const RECENT_MESSAGES: usize = 256;

/// Narrow adapter to the node's P2P layer. Sending must not block the caller.
pub trait Transport: Clone + Send + 'static {
    /// Deliver `payload` to `peer`.
    fn send(&mut self, peer: Address, payload: Vec<u8>);
}

/// Narrow adapter to the node's chain storage. Read from both the engine thread and the
/// sealing thread, hence `Sync`.
pub trait ChainReader: Clone + Send + Sync + 'static {
    /// The current chain head.
    fn current_block(&self) -> Block;

    /// Look up a header by hash and height.
    fn get_header(&self, hash: &Hash, number: BlockHeight) -> Option<Header>;

    /// Look up a header by height on the canonical chain.
    fn get_header_by_number(&self, number: BlockHeight) -> Option<Header>;

    /// Check the node's bad-block list.
    fn has_bad_block(&self, hash: &Hash) -> bool;

    /// Hand a committed block that this node did not build to the chain fetcher for insertion.
    fn enqueue_block(&self, block: Block);
}

/// The capability the consensus core depends on.
pub trait Backend: Clone + Send + 'static {
    /// The local signing address.
    fn address(&self) -> Address;

    /// The validator set at `height`. Constant within an epoch.
    fn validators(&self, height: BlockHeight) -> ValidatorSet;

    /// Deliver `payload` to every validator, including the local engine (through its mailbox).
    fn broadcast(&self, valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError>;

    /// Deliver `payload` to remote validators only.
    fn gossip(&self, valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError>;

    /// Deliver `payload` to `valset`'s current proposer.
    fn unicast(&self, valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError>;

    /// Sign `data` with the local key.
    fn sign(&self, data: &[u8]) -> SignatureBytes;

    /// Check that `signature` over `data` recovers to `address`.
    fn check_signature(
        &self,
        data: &[u8],
        address: Address,
        signature: &SignatureBytes,
    ) -> Result<(), ConsensusError>;

    /// Verify a proposal's body and header. [`ConsensusError::FutureBlock`] carries a positive
    /// delay after which the caller may retry.
    fn verify(&self, block: &Block) -> Result<(), ConsensusError>;

    /// Write committed `seals` into the proposal's header extra, returning the sealed proposal
    /// and its quorum certificate at `view`.
    fn pre_commit(
        &self,
        view: View,
        block: &Block,
        seals: Vec<SignatureBytes>,
    ) -> Result<(Block, QuorumCert), ConsensusError>;

    /// Commit a decided proposal: wake the local seal waiter if this node built it, otherwise
    /// enqueue it for the chain fetcher.
    fn commit(&self, block: Block) -> Result<(), ConsensusError>;

    /// The chain head and its proposer.
    fn last_proposal(&self) -> (Block, Address);

    /// Check whether the chain has a header with `hash` at `number`.
    fn has_proposal(&self, hash: &Hash, number: BlockHeight) -> bool;

    /// The proposer of the committed block at `number`.
    fn get_proposer(&self, number: BlockHeight) -> Address;
}

/// A bounded first-in-first-out hash ring. Overflow drops the oldest entry; a peer may then
/// receive a duplicate, but never misses a message, since honest validators re-gossip.
pub struct BoundedHashCache {
    capacity: usize,
    order: VecDeque<Hash>,
    set: HashSet<Hash>,
}

impl BoundedHashCache {
    /// Create a cache holding at most `capacity` hashes.
    pub fn new(capacity: usize) -> BoundedHashCache {
        BoundedHashCache {
            capacity,
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
        }
    }

    /// Record `hash`. Returns `false` if it was already recorded.
    pub fn insert(&mut self, hash: Hash) -> bool {
        if self.set.contains(&hash) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.order.push_back(hash);
        self.set.insert(hash);
        true
    }

    /// Check whether `hash` is recorded.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.set.contains(hash)
    }
}

struct BackendInner<T: Transport, C: ChainReader> {
    signer: Signer,
    validators: ValidatorSet,
    transport: Mutex<T>,
    chain: C,
    core: OnceLock<CoreHandle>,
    known_messages: Mutex<BoundedHashCache>,
    recent_messages: Mutex<HashMap<Address, BoundedHashCache>>,
    proposed_block_hash: Mutex<Option<Hash>>,
    commit_tx: Mutex<Sender<Option<Block>>>,
    commit_rx: Mutex<Receiver<Option<Block>>>,
}

/// The production [`Backend`]: wires the consensus core to a [`Transport`] and a
/// [`ChainReader`], deduplicates gossip with bounded hash rings, and parks
/// [`seal`](Self::seal) callers on the commit channel.
pub struct ConsensusBackend<T: Transport, C: ChainReader> {
    inner: Arc<BackendInner<T, C>>,
}

impl<T: Transport, C: ChainReader> Clone for ConsensusBackend<T, C> {
    fn clone(&self) -> Self {
        ConsensusBackend {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, C: ChainReader> ConsensusBackend<T, C> {
    /// Create a backend for the validator identified by `signer`, with the epoch's validator
    /// roster and the node's transport and chain adapters.
    pub fn new(signer: Signer, validators: ValidatorSet, transport: T, chain: C) -> Self {
        let (commit_tx, commit_rx) = mpsc::channel();
        ConsensusBackend {
            inner: Arc::new(BackendInner {
                signer,
                validators,
                transport: Mutex::new(transport),
                chain,
                core: OnceLock::new(),
                known_messages: Mutex::new(BoundedHashCache::new(KNOWN_MESSAGES)),
                recent_messages: Mutex::new(HashMap::new()),
                proposed_block_hash: Mutex::new(None),
                commit_tx: Mutex::new(commit_tx),
                commit_rx: Mutex::new(commit_rx),
            }),
        }
    }

    /// Inject the engine's handle. Called once, after [`start_core`](crate::engine::start_core).
    pub fn attach_core(&self, core: CoreHandle) {
        let _ = self.inner.core.set(core);
    }

    /// Feed a payload received from the network into the engine, deduplicating against the
    /// known-message ring. Duplicates are dropped silently.
    pub fn handle_message(&self, payload: Vec<u8>) -> Result<(), ConsensusError> {
        let hash = keccak256(&payload);
        if !self.inner.known_messages.lock().unwrap().insert(hash) {
            return Ok(());
        }
        self.post(CoreEvent::Message(payload))
    }

    /// Tell the engine that a new chain head was committed (by this node or through the
    /// fetcher), so it can move to the next height.
    pub fn new_chain_head(&self) -> Result<(), ConsensusError> {
        self.post(CoreEvent::FinalCommitted)
    }

    /// Ask the engine to get `block` committed, then wait for the commit event for it.
    ///
    /// Blocks until the engine commits the locally proposed hash, `timeout` elapses
    /// (`Ok(None)`), or [`abort_seal`](Self::abort_seal) unblocks the wait early (`Ok(None)`,
    /// used when a higher round made the request stale).
    pub fn seal(&self, block: Block, timeout: Duration) -> Result<Option<Block>, ConsensusError> {
        *self.inner.proposed_block_hash.lock().unwrap() = Some(block.hash());
        self.post(CoreEvent::Request(block))?;

        // One sealer at a time: the receiver lock is held for the whole wait.
        let receiver = self.inner.commit_rx.lock().unwrap();
        match receiver.recv_timeout(timeout) {
            Ok(sealed) => Ok(sealed),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ConsensusError::EngineStopped),
        }
    }

    /// Unblock a pending [`seal`](Self::seal) without a commit.
    pub fn abort_seal(&self) {
        *self.inner.proposed_block_hash.lock().unwrap() = None;
        let _ = self.inner.commit_tx.lock().unwrap().send(None);
    }

    fn post(&self, event: CoreEvent) -> Result<(), ConsensusError> {
        match self.inner.core.get() {
            Some(core) => core.post(event),
            None => {
                log::warn!("consensus core not attached yet, dropping event");
                Ok(())
            }
        }
    }

    fn send_deduplicated(&self, peer: Address, hash: Hash, payload: &[u8]) {
        let mut recent = self.inner.recent_messages.lock().unwrap();
        let ring = recent
            .entry(peer)
            .or_insert_with(|| BoundedHashCache::new(RECENT_MESSAGES));
        if !ring.insert(hash) {
            // This peer already saw the payload.
            return;
        }
        self.inner.transport.lock().unwrap().send(peer, payload.to_vec());
    }
}

impl<T: Transport, C: ChainReader> Backend for ConsensusBackend<T, C> {
    fn address(&self) -> Address {
        self.inner.signer.address()
    }

    fn validators(&self, _height: BlockHeight) -> ValidatorSet {
        self.inner.validators.clone()
    }

    fn broadcast(&self, valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError> {
        self.gossip(valset, payload.clone())?;
        // Deliver to the local engine through its mailbox, like any other message.
        self.post(CoreEvent::Message(payload))
    }

    fn gossip(&self, valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError> {
        let hash = keccak256(&payload);
        self.inner.known_messages.lock().unwrap().insert(hash);
        for peer in valset.list() {
            if *peer == self.address() {
                continue;
            }
            self.send_deduplicated(*peer, hash, &payload);
        }
        Ok(())
    }

    fn unicast(&self, valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError> {
        let target = valset.proposer();
        if target == self.address() {
            return self.post(CoreEvent::Message(payload));
        }
        let hash = keccak256(&payload);
        self.inner.known_messages.lock().unwrap().insert(hash);
        self.send_deduplicated(target, hash, &payload);
        Ok(())
    }

    fn sign(&self, data: &[u8]) -> SignatureBytes {
        self.inner.signer.sign(data)
    }

    fn check_signature(
        &self,
        data: &[u8],
        address: Address,
        signature: &SignatureBytes,
    ) -> Result<(), ConsensusError> {
        signer::check_signature(data, address, signature)
    }

    fn verify(&self, block: &Block) -> Result<(), ConsensusError> {
        if self.inner.chain.has_bad_block(&block.hash()) {
            return Err(ConsensusError::BadBlock);
        }

        if derive_tx_root(&block.transactions) != block.header.tx_root {
            return Err(ConsensusError::MismatchTxRoot);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if block.header.timestamp > now {
            let delay = Duration::from_secs(block.header.timestamp - now);
            return Err(ConsensusError::FutureBlock(delay));
        }

        signer::verify_header(&block.header, &self.inner.validators, false)
    }

    fn pre_commit(
        &self,
        view: View,
        block: &Block,
        seals: Vec<SignatureBytes>,
    ) -> Result<(Block, QuorumCert), ConsensusError> {
        let header = write_committed_seals(&block.header, seals)?;
        let sealed = block.with_header(header);
        let qc = QuorumCert {
            view,
            hash: sealed.hash(),
            proposer: sealed.coinbase(),
            extra: sealed.header.extra.clone(),
        };
        Ok((sealed, qc))
    }

    fn commit(&self, block: Block) -> Result<(), ConsensusError> {
        log::info!(
            "committed, address: {}, hash: {}, number: {}",
            self.address(),
            block.hash(),
            block.number()
        );

        let proposed = *self.inner.proposed_block_hash.lock().unwrap();
        if proposed == Some(block.hash()) {
            // Feed the block to the waiting seal() call.
            let _ = self.inner.commit_tx.lock().unwrap().send(Some(block));
            return Ok(());
        }

        self.inner.chain.enqueue_block(block);
        Ok(())
    }

    fn last_proposal(&self) -> (Block, Address) {
        let block = self.inner.chain.current_block();
        let proposer = block.coinbase();
        (block, proposer)
    }

    fn has_proposal(&self, hash: &Hash, number: BlockHeight) -> bool {
        self.inner.chain.get_header(hash, number).is_some()
    }

    fn get_proposer(&self, number: BlockHeight) -> Address {
        self.inner
            .chain
            .get_header_by_number(number)
            .map(|header| header.coinbase)
            .unwrap_or_else(Address::empty)
    }
}
