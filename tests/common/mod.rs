pub(crate) mod chain;

pub(crate) mod logging;

pub(crate) mod network;

use hotstuff_bft::signer::Signer;
use hotstuff_bft::types::block::{derive_tx_root, Block, Header, HotstuffExtra};
use hotstuff_bft::types::crypto_primitives::Keypair;
use hotstuff_bft::types::data_types::{Address, BlockHeight, Epoch, Round};
use hotstuff_bft::types::validator_set::ValidatorSet;

/// `n` deterministic keypairs, so test transcripts are reproducible.
pub(crate) fn keypairs(n: usize) -> Vec<Keypair> {
    (1..=n)
        .map(|i| {
            let mut secret = [0u8; 32];
            secret[31] = i as u8;
            secret[0] = 0x42;
            Keypair::from_bytes(secret).expect("deterministic test key is valid")
        })
        .collect()
}

pub(crate) fn valset_of(keypairs: &[Keypair]) -> ValidatorSet {
    ValidatorSet::new(keypairs.iter().map(Keypair::address).collect())
}

pub(crate) fn keypair_by_address(keypairs: &[Keypair], address: &Address) -> Keypair {
    keypairs
        .iter()
        .find(|keypair| keypair.address() == *address)
        .expect("address belongs to one of the test keypairs")
        .clone()
}

/// An unsealed block extending `parent`, as the miner would hand to the engine.
pub(crate) fn build_block(proposer: &Signer, roster: &[Address], parent: &Block) -> Block {
    let extra = HotstuffExtra::new(Epoch::new(0), Round::new(0), roster.to_vec());
    let header = Header {
        parent_hash: parent.hash(),
        coinbase: proposer.address(),
        number: BlockHeight::new(parent.number().int() + 1),
        tx_root: derive_tx_root(&[]),
        timestamp: 0,
        extra: extra.encode(),
    };
    Block::new(header, Vec::new())
}
