/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the block, header, and header-extra types and their hashing rules.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::errors::ConsensusError;
use crate::types::crypto_primitives::keccak256;
use crate::types::data_types::{Address, BlockHeight, Epoch, Hash, Round, SignatureBytes};

const ENCODING_FAILED: &str = "borsh encoding of an in-memory value cannot fail";

/// The consensus payload embedded in a header's `extra` field.
///
/// ## Layout
///
/// `[epoch, round, validators[], proposer seal (65B), committed seals (65B each)]`. The epoch
/// and round stamp the consensus view the block was proposed in; the validator list pins the
/// roster the seals must be checked against.
///
/// ## Seals and block identity
///
/// The proposer seal is the proposer's signature over the block hash; a committed seal is a
/// validator's signature over the block hash salted with the commit-vote message code. Both are
/// cleared before hashing (see [`Header::hash`]), so a sealed and an unsealed rendition of the
/// same proposal share one hash.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct HotstuffExtra {
    pub epoch: Epoch,
    pub round: Round,
    pub validators: Vec<Address>,
    pub seal: SignatureBytes,
    pub committed_seals: Vec<SignatureBytes>,
}

impl HotstuffExtra {
    /// Create an unsealed `HotstuffExtra` for the given view stamp and validator roster.
    pub fn new(epoch: Epoch, round: Round, validators: Vec<Address>) -> HotstuffExtra {
        Self {
            epoch,
            round,
            validators,
            seal: SignatureBytes::empty(),
            committed_seals: Vec::new(),
        }
    }

    /// Deserialize a `HotstuffExtra` from raw header-extra bytes.
    pub fn decode(bytes: &[u8]) -> Result<HotstuffExtra, ConsensusError> {
        HotstuffExtra::try_from_slice(bytes)
            .map_err(|_| ConsensusError::FailedDecode("header extra"))
    }

    /// Serialize this `HotstuffExtra` into raw header-extra bytes.
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect(ENCODING_FAILED)
    }

    /// A copy with the proposer seal and the committed seals cleared. This is the rendition
    /// that block hashing operates on.
    pub fn sans_seals(&self) -> HotstuffExtra {
        HotstuffExtra {
            seal: SignatureBytes::empty(),
            committed_seals: Vec::new(),
            ..self.clone()
        }
    }

    /// A copy with only the committed seals cleared, keeping the proposer seal. This is the
    /// rendition a proposal returns to when it re-enters a PREPARE exchange: the proposer seal
    /// still authenticates it, but quorum seals belong to the next certificate.
    pub fn sans_committed_seals(&self) -> HotstuffExtra {
        HotstuffExtra {
            committed_seals: Vec::new(),
            ..self.clone()
        }
    }
}

/// A block header.
///
/// `extra` carries a borsh-encoded [`HotstuffExtra`]; headers whose extra does not decode are
/// still hashable (over their raw bytes) so they can be referenced and rejected.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Header {
    pub parent_hash: Hash,
    pub coinbase: Address,
    pub number: BlockHeight,
    pub tx_root: Hash,
    pub timestamp: u64,
    pub extra: Vec<u8>,
}

impl Header {
    /// Compute the identity hash of this header: the Keccak-256 hash of the header with both
    /// kinds of seals cleared from its extra.
    pub fn hash(&self) -> Hash {
        let stripped = match HotstuffExtra::decode(&self.extra) {
            Ok(extra) => self.with_extra(&extra.sans_seals()),
            Err(_) => self.clone(),
        };
        keccak256(&borsh::to_vec(&stripped).expect(ENCODING_FAILED))
    }

    /// Decode the [`HotstuffExtra`] embedded in this header.
    pub fn extra(&self) -> Result<HotstuffExtra, ConsensusError> {
        HotstuffExtra::decode(&self.extra)
    }

    /// A copy of this header with its extra replaced by `extra`.
    pub fn with_extra(&self, extra: &HotstuffExtra) -> Header {
        Header {
            extra: extra.encode(),
            ..self.clone()
        }
    }
}

/// An opaque transaction payload. The consensus core never interprets transaction contents; it
/// only checks that a proposal's transaction root matches its body.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Transaction(pub Vec<u8>);

impl Transaction {
    /// Compute the Keccak-256 hash of this transaction's payload.
    pub fn hash(&self) -> Hash {
        keccak256(&self.0)
    }
}

/// A block: a header plus its transaction body.
///
/// Identity is the header hash. The narrow set of methods below is all the consensus core ever
/// needs from a proposal.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new `Block` from `header` and `transactions`.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Block {
        Block {
            header,
            transactions,
        }
    }

    /// Create the genesis block for an initial validator roster. The roster must be sorted by
    /// the caller only in the sense that [`HotstuffExtra`] preserves it verbatim; proposer
    /// selection sorts its own copy.
    pub fn genesis(epoch: Epoch, validators: Vec<Address>) -> Block {
        let extra = HotstuffExtra::new(epoch, Round::new(0), validators);
        let header = Header {
            parent_hash: Hash::empty(),
            coinbase: Address::empty(),
            number: BlockHeight::new(0),
            tx_root: derive_tx_root(&[]),
            timestamp: 0,
            extra: extra.encode(),
        };
        Block::new(header, Vec::new())
    }

    /// The identity hash of this block (see [`Header::hash`]).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The height of this block.
    pub fn number(&self) -> BlockHeight {
        self.header.number
    }

    /// The hash of this block's parent.
    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    /// The address of this block's proposer.
    pub fn coinbase(&self) -> Address {
        self.header.coinbase
    }

    /// The consensus round stamped into this block's header extra.
    pub fn round(&self) -> Result<Round, ConsensusError> {
        Ok(self.header.extra()?.round)
    }

    /// The borsh encoding of this block's header.
    pub fn encoded_header(&self) -> Vec<u8> {
        borsh::to_vec(&self.header).expect(ENCODING_FAILED)
    }

    /// A copy of this block with its header replaced by `header`.
    pub fn with_header(&self, header: Header) -> Block {
        Block {
            header,
            transactions: self.transactions.clone(),
        }
    }
}

/// Derive the transaction root of a body: the Keccak-256 hash of the concatenated transaction
/// hashes.
pub fn derive_tx_root(transactions: &[Transaction]) -> Hash {
    let mut preimage = Vec::with_capacity(transactions.len() * 32);
    for transaction in transactions {
        preimage.extend_from_slice(&transaction.hash().bytes());
    }
    keccak256(&preimage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extra() -> HotstuffExtra {
        HotstuffExtra::new(
            Epoch::new(0),
            Round::new(3),
            vec![Address::new([1u8; 20]), Address::new([2u8; 20])],
        )
    }

    fn block() -> Block {
        let header = Header {
            parent_hash: Hash::new([9u8; 32]),
            coinbase: Address::new([1u8; 20]),
            number: BlockHeight::new(5),
            tx_root: derive_tx_root(&[]),
            timestamp: 1_700_000_000,
            extra: extra().encode(),
        };
        Block::new(header, Vec::new())
    }

    #[test]
    fn extra_roundtrips_through_encoding() {
        let extra = extra();
        assert_eq!(HotstuffExtra::decode(&extra.encode()).unwrap(), extra);
    }

    #[test]
    fn sans_committed_seals_keeps_the_proposer_seal() {
        let mut sealed = extra();
        sealed.seal = SignatureBytes::new([7u8; 65]);
        sealed.committed_seals = vec![SignatureBytes::new([8u8; 65]); 3];

        let stripped = sealed.sans_committed_seals();
        assert_eq!(stripped.seal, sealed.seal);
        assert!(stripped.committed_seals.is_empty());
        assert_eq!(stripped.validators, sealed.validators);
        assert_eq!(stripped.round, sealed.round);

        // The full strip clears both kinds of seal.
        let bare = sealed.sans_seals();
        assert!(bare.seal.is_empty());
        assert!(bare.committed_seals.is_empty());
    }

    #[test]
    fn stripping_committed_seals_preserves_block_identity() {
        let base = block();

        let mut sealed_extra = extra();
        sealed_extra.seal = SignatureBytes::new([7u8; 65]);
        sealed_extra.committed_seals = vec![SignatureBytes::new([8u8; 65]); 3];
        let sealed = base.with_header(base.header.with_extra(&sealed_extra));

        let stripped = sealed.with_header(
            sealed
                .header
                .with_extra(&sealed_extra.sans_committed_seals()),
        );

        assert_eq!(stripped.hash(), sealed.hash());
        assert_eq!(stripped.header.extra().unwrap().seal, sealed_extra.seal);
    }

    #[test]
    fn hash_is_stable_across_sealing() {
        let unsealed = block();

        let mut sealed_extra = extra();
        sealed_extra.seal = SignatureBytes::new([7u8; 65]);
        sealed_extra.committed_seals = vec![SignatureBytes::new([8u8; 65]); 3];
        let sealed = unsealed.with_header(unsealed.header.with_extra(&sealed_extra));

        assert_eq!(unsealed.hash(), sealed.hash());
    }

    #[test]
    fn hash_covers_view_stamp_and_parent() {
        let base = block();

        let mut restamped_extra = extra();
        restamped_extra.round = Round::new(4);
        let restamped = base.with_header(base.header.with_extra(&restamped_extra));
        assert_ne!(base.hash(), restamped.hash());

        let mut reparented_header = base.header.clone();
        reparented_header.parent_hash = Hash::new([8u8; 32]);
        assert_ne!(base.hash(), base.with_header(reparented_header).hash());
    }

    #[test]
    fn tx_root_depends_on_body() {
        let empty = derive_tx_root(&[]);
        let one = derive_tx_root(&[Transaction(vec![1, 2, 3])]);
        let two = derive_tx_root(&[Transaction(vec![1, 2, 3]), Transaction(vec![4])]);

        assert_ne!(empty, one);
        assert_ne!(one, two);
        assert_eq!(one, derive_tx_root(&[Transaction(vec![1, 2, 3])]));
    }
}
