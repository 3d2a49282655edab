/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signing and verification of payloads, header seals, and certificates.
//!
//! The [`Signer`] produces every signature a validator emits: message signatures, the proposer
//! seal embedded in a header's extra, per-message committed seals, and timeout seals. The free
//! functions verify the other direction: recovering signers and checking that certificates carry
//! a quorum of distinct, known validators.
//!
//! ## Signature domains
//!
//! Every signature is ECDSA over a Keccak-256 digest. The domains are separated by their
//! preimages:
//! - payload signature / proposer seal: the payload bytes / the block hash bytes;
//! - committed seal: the block hash bytes salted with the commit-vote message code;
//! - timeout seal: the borsh encoding of (view, ∅).

use std::collections::HashSet;

use borsh::to_vec;

use crate::errors::ConsensusError;
use crate::messages::MsgCode;
use crate::types::block::Header;
use crate::types::certificates::{QuorumCert, TimeoutCert};
use crate::types::crypto_primitives::{keccak256, recover, Keypair};
use crate::types::data_types::{Address, Hash, SignatureBytes, View};
use crate::types::validator_set::ValidatorSet;

const ENCODING_FAILED: &str = "borsh encoding of an in-memory value cannot fail";

/// The preimage of a committed seal: the block hash salted with the commit-vote code.
pub fn committed_seal_message(hash: &Hash) -> Vec<u8> {
    let mut message = hash.bytes().to_vec();
    message.push(MsgCode::CommitVote as u8);
    message
}

/// The preimage of a timeout seal: the borsh encoding of (view, ∅).
pub fn timeout_seal_message(view: &View) -> Vec<u8> {
    to_vec(&(view, Hash::empty())).expect(ENCODING_FAILED)
}

/// Recover the address that signed `message` (a non-prehashed byte string).
pub fn recover_signer(
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<Address, ConsensusError> {
    recover(&keccak256(message), signature)
}

/// Check that `signature` over `message` recovers to `address`.
pub fn check_signature(
    message: &[u8],
    address: Address,
    signature: &SignatureBytes,
) -> Result<(), ConsensusError> {
    if recover_signer(message, signature)? == address {
        Ok(())
    } else {
        Err(ConsensusError::InvalidSignature)
    }
}

/// A validator's signing identity.
#[derive(Clone)]
pub struct Signer {
    keypair: Keypair,
    address: Address,
}

impl Signer {
    /// Create a new `Signer` from `keypair`.
    pub fn new(keypair: Keypair) -> Signer {
        let address = keypair.address();
        Signer { keypair, address }
    }

    /// The address of this signer.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign arbitrary payload bytes.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.keypair.sign(message)
    }

    /// Produce a committed seal for the proposal identified by `hash`.
    pub fn committed_seal(&self, hash: &Hash) -> SignatureBytes {
        self.keypair.sign(&committed_seal_message(hash))
    }

    /// Produce a timeout seal for `view`.
    pub fn timeout_seal(&self, view: &View) -> SignatureBytes {
        self.keypair.sign(&timeout_seal_message(view))
    }

    /// Write this signer's proposer seal into `header`'s extra and return the sealed header.
    ///
    /// The seal signs the header's identity hash, which is computed with both kinds of seals
    /// cleared, so sealing does not change the header's hash.
    pub fn seal_header(&self, header: &Header) -> Result<Header, ConsensusError> {
        let mut extra = header.extra()?;
        extra.seal = self.keypair.sign(&header.hash().bytes());
        Ok(header.with_extra(&extra))
    }
}

/// Write `seals` into `header`'s extra as its committed seals, returning the updated header.
pub fn write_committed_seals(
    header: &Header,
    seals: Vec<SignatureBytes>,
) -> Result<Header, ConsensusError> {
    let mut extra = header.extra()?;
    extra.committed_seals = seals;
    Ok(header.with_extra(&extra))
}

/// Verify a proposed header against `valset`:
/// - its extra must decode and embed the same validator roster,
/// - its proposer seal must recover to its coinbase, which must be a member of `valset`,
/// - and, if `check_committed_seals`, its committed seals must form a quorum.
pub fn verify_header(
    header: &Header,
    valset: &ValidatorSet,
    check_committed_seals: bool,
) -> Result<(), ConsensusError> {
    let extra = header.extra()?;

    let mut roster = extra.validators.clone();
    roster.sort();
    roster.dedup();
    if roster != valset.list() {
        return Err(ConsensusError::InvalidProposal);
    }

    let hash = header.hash();
    let sealer = recover_signer(&hash.bytes(), &extra.seal)?;
    if sealer != header.coinbase || !valset.contains(&header.coinbase) {
        return Err(ConsensusError::InvalidSigner);
    }

    if check_committed_seals {
        verify_quorum_seals(
            &extra.committed_seals,
            &committed_seal_message(&hash),
            valset,
            ConsensusError::VerifyQc,
        )?;
    }

    Ok(())
}

/// Verify a quorum certificate against `valset`.
///
/// Reconstructs the header extra embedded in the certificate, checks that the proposer seal
/// recovers to `qc.proposer` (a member of `valset`), and that the committed seals recover to at
/// least Q **distinct** members. Certificates for height 0 are genesis certificates and valid by
/// definition.
pub fn verify_qc(qc: &QuorumCert, valset: &ValidatorSet) -> Result<(), ConsensusError> {
    if qc.view.height.int() == 0 {
        return Ok(());
    }
    if qc.is_timeout_cert() {
        return Err(ConsensusError::VerifyQc);
    }

    let extra = crate::types::block::HotstuffExtra::decode(&qc.extra)?;

    let sealer = recover_signer(&qc.hash.bytes(), &extra.seal)?;
    if sealer != qc.proposer || !valset.contains(&qc.proposer) {
        return Err(ConsensusError::InvalidSigner);
    }

    verify_quorum_seals(
        &extra.committed_seals,
        &committed_seal_message(&qc.hash),
        valset,
        ConsensusError::VerifyQc,
    )
}

/// Verify a timeout certificate against `valset`: its seals must recover to at least Q distinct
/// members of `valset` over the (view, ∅) preimage.
pub fn verify_tc(tc: &TimeoutCert, valset: &ValidatorSet) -> Result<(), ConsensusError> {
    if !tc.hash.is_empty() {
        return Err(ConsensusError::VerifyTc);
    }
    verify_quorum_seals(
        &tc.seals,
        &timeout_seal_message(&tc.view),
        valset,
        ConsensusError::VerifyTc,
    )
}

// Distinctness matters: a certificate that repeats one validator's seal Q times must not count
// as a quorum.
fn verify_quorum_seals(
    seals: &[SignatureBytes],
    message: &[u8],
    valset: &ValidatorSet,
    on_shortfall: ConsensusError,
) -> Result<(), ConsensusError> {
    let mut signers: HashSet<Address> = HashSet::with_capacity(seals.len());
    for seal in seals {
        let signer = recover_signer(message, seal)?;
        if !valset.contains(&signer) {
            return Err(ConsensusError::InvalidSigner);
        }
        signers.insert(signer);
    }
    if signers.len() >= valset.quorum() {
        Ok(())
    } else {
        Err(on_shortfall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{signers, valset_of};
    use crate::types::block::{derive_tx_root, Block, Header, HotstuffExtra};
    use crate::types::data_types::{BlockHeight, Epoch, Round};

    fn proposal(proposer: &Signer, valset: &ValidatorSet) -> Block {
        let extra = HotstuffExtra::new(Epoch::new(0), Round::new(0), valset.list().to_vec());
        let header = Header {
            parent_hash: Hash::new([3u8; 32]),
            coinbase: proposer.address(),
            number: BlockHeight::new(1),
            tx_root: derive_tx_root(&[]),
            timestamp: 0,
            extra: extra.encode(),
        };
        Block::new(proposer.seal_header(&header).unwrap(), Vec::new())
    }

    fn sealed_qc(signers: &[Signer], sealers: &[usize], valset: &ValidatorSet) -> QuorumCert {
        let block = proposal(&signers[0], valset);
        let hash = block.hash();
        let seals = sealers
            .iter()
            .map(|i| signers[*i].committed_seal(&hash))
            .collect();
        let header = write_committed_seals(&block.header, seals).unwrap();
        QuorumCert::from_sealed_block(&block.with_header(header)).unwrap()
    }

    #[test]
    fn sealed_header_verifies() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let block = proposal(&signers[0], &valset);

        assert!(verify_header(&block.header, &valset, false).is_ok());
    }

    #[test]
    fn header_sealed_by_non_coinbase_is_rejected() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let mut block = proposal(&signers[0], &valset);
        block.header = signers[1].seal_header(&block.header).unwrap();

        assert_eq!(
            verify_header(&block.header, &valset, false),
            Err(ConsensusError::InvalidSigner)
        );
    }

    #[test]
    fn qc_with_quorum_of_distinct_seals_verifies() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let qc = sealed_qc(&signers, &[1, 2, 3], &valset);

        assert!(verify_qc(&qc, &valset).is_ok());
    }

    #[test]
    fn qc_with_replayed_seal_is_rejected() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        // Three seals, but only two distinct signers: below Q=3.
        let qc = sealed_qc(&signers, &[1, 1, 2], &valset);

        assert_eq!(verify_qc(&qc, &valset), Err(ConsensusError::VerifyQc));
    }

    #[test]
    fn qc_with_foreign_seal_is_rejected() {
        let four = signers(5);
        let valset = valset_of(&four[..4]);
        let qc = sealed_qc(&four, &[1, 2, 4], &valset);

        assert_eq!(verify_qc(&qc, &valset), Err(ConsensusError::InvalidSigner));
    }

    #[test]
    fn genesis_qc_is_valid_by_definition() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let genesis = Block::genesis(Epoch::new(0), valset.list().to_vec());

        let qc = QuorumCert::from_sealed_block(&genesis).unwrap();
        assert!(verify_qc(&qc, &valset).is_ok());
    }

    #[test]
    fn tc_requires_quorum_of_distinct_timeout_seals() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let view = View::new(BlockHeight::new(2), Round::new(1));

        let distinct: Vec<_> = signers[..3].iter().map(|s| s.timeout_seal(&view)).collect();
        assert!(verify_tc(&TimeoutCert::new(view, distinct), &valset).is_ok());

        let replayed = vec![
            signers[0].timeout_seal(&view),
            signers[0].timeout_seal(&view),
            signers[1].timeout_seal(&view),
        ];
        assert_eq!(
            verify_tc(&TimeoutCert::new(view, replayed), &valset),
            Err(ConsensusError::VerifyTc)
        );
    }
}
