/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Quorum certificates and timeout certificates.
//!
//! A [`QuorumCert`] proves that at least a quorum of distinct validators committed-sealed a
//! proposal at a view; a [`TimeoutCert`] proves that a quorum timed out at a view. The two share
//! a wire shape in one place: a proposal's `justify` field is always a `QuorumCert`, and a
//! timeout certificate travels there with an empty hash ([`QuorumCert::is_timeout_cert`]).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::errors::ConsensusError;
use crate::types::block::Block;
use crate::types::data_types::{Address, Hash, SignatureBytes, View};

const ENCODING_FAILED: &str = "borsh encoding of an in-memory value cannot fail";

/// Proof that a quorum of validators agreed on a proposal at a view.
///
/// `extra` carries the sealed header-extra bytes of the certified proposal, from which the
/// proposer seal and the committed seals are recovered during
/// [verification](crate::signer::verify_qc).
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct QuorumCert {
    pub view: View,
    pub hash: Hash,
    pub proposer: Address,
    pub extra: Vec<u8>,
}

impl QuorumCert {
    /// Check whether this certificate is a [`TimeoutCert`] in quorum-certificate clothing: a QC
    /// with an empty hash certifies no proposal and is a timeout certificate.
    pub fn is_timeout_cert(&self) -> bool {
        self.hash.is_empty()
    }

    /// Build the certificate embedded in a sealed block: its view is the block's height and the
    /// round stamped in its extra, and its extra bytes are the block's sealed header extra.
    ///
    /// The genesis block yields the genesis certificate this way; quorum verification accepts
    /// height-0 certificates without seals.
    pub fn from_sealed_block(block: &Block) -> Result<QuorumCert, ConsensusError> {
        let extra = block.header.extra()?;
        Ok(QuorumCert {
            view: View::new(block.number(), extra.round),
            hash: block.hash(),
            proposer: block.coinbase(),
            extra: block.header.extra.clone(),
        })
    }

    /// Wrap a timeout certificate for transport in a `justify` slot: empty hash, no proposer,
    /// and the timeout seals as the extra bytes.
    pub fn from_timeout_cert(tc: &TimeoutCert) -> QuorumCert {
        QuorumCert {
            view: tc.view,
            hash: Hash::empty(),
            proposer: Address::empty(),
            extra: borsh::to_vec(&tc.seals).expect(ENCODING_FAILED),
        }
    }
}

/// Proof that a quorum of validators timed out at a view. Its hash is always empty (∅).
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct TimeoutCert {
    pub view: View,
    pub hash: Hash,
    pub seals: Vec<SignatureBytes>,
}

impl TimeoutCert {
    /// Create a new `TimeoutCert` over `view` from the aggregated timeout `seals`.
    pub fn new(view: View, seals: Vec<SignatureBytes>) -> TimeoutCert {
        TimeoutCert {
            view,
            hash: Hash::empty(),
            seals,
        }
    }

    /// Unwrap a timeout certificate that traveled as a `justify` certificate.
    ///
    /// Fails if `qc` is not a timeout certificate or its seal list does not decode.
    pub fn from_qc(qc: &QuorumCert) -> Result<TimeoutCert, ConsensusError> {
        if !qc.is_timeout_cert() {
            return Err(ConsensusError::VerifyTc);
        }
        let seals = Vec::<SignatureBytes>::try_from_slice(&qc.extra)
            .map_err(|_| ConsensusError::FailedDecode("timeout certificate seals"))?;
        Ok(TimeoutCert::new(qc.view, seals))
    }
}
