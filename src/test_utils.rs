/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Shared fixtures for the in-crate unit tests: deterministic signers, block builders, and a
//! recording mock backend.

use std::sync::{Arc, Mutex};

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::signer::{write_committed_seals, Signer};
use crate::types::block::{derive_tx_root, Block, Header, HotstuffExtra};
use crate::types::certificates::QuorumCert;
use crate::types::crypto_primitives::Keypair;
use crate::types::data_types::{Address, BlockHeight, Epoch, Hash, Round, SignatureBytes, View};
use crate::types::validator_set::ValidatorSet;

/// `n` signers with deterministic keys. Stable across runs, so test transcripts are
/// reproducible.
pub(crate) fn signers(n: usize) -> Vec<Signer> {
    (1..=n)
        .map(|i| {
            let mut secret = [0u8; 32];
            secret[31] = i as u8;
            secret[0] = 0x10;
            Signer::new(Keypair::from_bytes(secret).expect("deterministic test key is valid"))
        })
        .collect()
}

/// The validator set formed by `signers`' addresses.
pub(crate) fn valset_of(signers: &[Signer]) -> ValidatorSet {
    ValidatorSet::new(signers.iter().map(Signer::address).collect())
}

/// The raw keypair behind one of [`signers`]'s entries, for constructing engines.
pub(crate) fn keypair_of(signer: &Signer, all: &[Signer]) -> Keypair {
    for (i, candidate) in all.iter().enumerate() {
        if candidate.address() == signer.address() {
            let mut secret = [0u8; 32];
            secret[31] = (i + 1) as u8;
            secret[0] = 0x10;
            return Keypair::from_bytes(secret).expect("deterministic test key is valid");
        }
    }
    panic!("unknown test signer");
}

/// The signer among `signers` whose address is `address`.
pub(crate) fn signer_by_address<'a>(signers: &'a [Signer], address: &Address) -> &'a Signer {
    signers
        .iter()
        .find(|signer| signer.address() == *address)
        .expect("address belongs to one of the test signers")
}

/// Build a proposer-sealed, uncommitted proposal extending `parent_hash`.
pub(crate) fn make_proposal(
    proposer: &Signer,
    valset: &ValidatorSet,
    parent_hash: Hash,
    height: u64,
    round: u64,
) -> Block {
    let extra = HotstuffExtra::new(Epoch::new(0), Round::new(round), valset.list().to_vec());
    let header = Header {
        parent_hash,
        coinbase: proposer.address(),
        number: BlockHeight::new(height),
        tx_root: derive_tx_root(&[]),
        timestamp: 0,
        extra: extra.encode(),
    };
    Block::new(
        proposer.seal_header(&header).expect("test header extra decodes"),
        Vec::new(),
    )
}

/// Commit-seal `block` with seals from the first Q of `signers` and return the sealed block
/// with its certificate.
pub(crate) fn seal_with_quorum(
    block: &Block,
    signers: &[Signer],
    valset: &ValidatorSet,
) -> (Block, QuorumCert) {
    let hash = block.hash();
    let seals: Vec<SignatureBytes> = signers
        .iter()
        .take(valset.quorum())
        .map(|signer| signer.committed_seal(&hash))
        .collect();
    let header =
        write_committed_seals(&block.header, seals).expect("test header extra decodes");
    let sealed = block.with_header(header);
    let qc = QuorumCert::from_sealed_block(&sealed).expect("sealed test header decodes");
    (sealed, qc)
}

/// A committed-sealed chain of `len` blocks: `blocks[0]` is genesis, `blocks[i]` has height `i`
/// and round `i - 1`, so rounds are consecutive (no timeouts). Returns the blocks and their
/// certificates.
pub(crate) fn chain_of(
    signers: &[Signer],
    valset: &ValidatorSet,
    len: usize,
) -> (Vec<Block>, Vec<QuorumCert>) {
    let mut blocks = vec![Block::genesis(Epoch::new(0), valset.list().to_vec())];
    let mut qcs =
        vec![QuorumCert::from_sealed_block(&blocks[0]).expect("genesis extra decodes")];

    for height in 1..len as u64 {
        let round = height - 1;
        let mut proposer_valset = valset.clone();
        proposer_valset.calc_proposer(Round::new(round));
        let proposer = signer_by_address(signers, &proposer_valset.proposer());

        let proposal = make_proposal(
            proposer,
            valset,
            blocks[height as usize - 1].hash(),
            height,
            round,
        );
        let (sealed, qc) = seal_with_quorum(&proposal, signers, valset);
        blocks.push(sealed);
        qcs.push(qc);
    }

    (blocks, qcs)
}

/// What a [`MockBackend`] was asked to send.
#[derive(Clone, Debug)]
pub(crate) enum Sent {
    Broadcast(Vec<u8>),
    Unicast(Address, Vec<u8>),
}

struct MockInner {
    signer: Signer,
    valset: ValidatorSet,
    chain: Mutex<Vec<Block>>,
    sent: Mutex<Vec<Sent>>,
    committed: Mutex<Vec<Block>>,
}

/// A backend that records every outbound message and commit instead of touching a network or a
/// database. The chain starts at genesis and grows only through
/// [`append_block`](MockBackend::append_block).
#[derive(Clone)]
pub(crate) struct MockBackend {
    inner: Arc<MockInner>,
}

impl MockBackend {
    pub(crate) fn new(signer: Signer, valset: ValidatorSet) -> MockBackend {
        let genesis = Block::genesis(Epoch::new(0), valset.list().to_vec());
        MockBackend {
            inner: Arc::new(MockInner {
                signer,
                valset,
                chain: Mutex::new(vec![genesis]),
                sent: Mutex::new(Vec::new()),
                committed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Drain the record of outbound messages.
    pub(crate) fn drain_sent(&self) -> Vec<Sent> {
        std::mem::take(&mut self.inner.sent.lock().unwrap())
    }

    /// The blocks passed to [`Backend::commit`], in order.
    pub(crate) fn committed(&self) -> Vec<Block> {
        self.inner.committed.lock().unwrap().clone()
    }

    /// Append a block to the mock chain, as the surrounding node would after a commit.
    pub(crate) fn append_block(&self, block: Block) {
        self.inner.chain.lock().unwrap().push(block);
    }

    pub(crate) fn genesis(&self) -> Block {
        self.inner.chain.lock().unwrap()[0].clone()
    }
}

impl Backend for MockBackend {
    fn address(&self) -> Address {
        self.inner.signer.address()
    }

    fn validators(&self, _height: BlockHeight) -> ValidatorSet {
        self.inner.valset.clone()
    }

    fn broadcast(&self, _valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError> {
        self.inner.sent.lock().unwrap().push(Sent::Broadcast(payload));
        Ok(())
    }

    fn gossip(&self, _valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError> {
        self.inner.sent.lock().unwrap().push(Sent::Broadcast(payload));
        Ok(())
    }

    fn unicast(&self, valset: &ValidatorSet, payload: Vec<u8>) -> Result<(), ConsensusError> {
        self.inner
            .sent
            .lock()
            .unwrap()
            .push(Sent::Unicast(valset.proposer(), payload));
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
        crate::signer::check_signature(data, address, signature)
    }

    fn verify(&self, block: &Block) -> Result<(), ConsensusError> {
        if block.header.tx_root != derive_tx_root(&block.transactions) {
            return Err(ConsensusError::MismatchTxRoot);
        }
        Ok(())
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
        self.inner.committed.lock().unwrap().push(block);
        Ok(())
    }

    fn last_proposal(&self) -> (Block, Address) {
        let chain = self.inner.chain.lock().unwrap();
        let last = chain.last().expect("mock chain starts at genesis").clone();
        let proposer = last.coinbase();
        (last, proposer)
    }

    fn has_proposal(&self, hash: &Hash, number: BlockHeight) -> bool {
        self.inner
            .chain
            .lock()
            .unwrap()
            .iter()
            .any(|block| block.hash() == *hash && block.number() == number)
    }

    fn get_proposer(&self, number: BlockHeight) -> Address {
        self.inner
            .chain
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.number() == number)
            .map(Block::coinbase)
            .unwrap_or_else(Address::empty)
    }
}
