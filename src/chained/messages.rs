/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Payloads of the chained engine's messages.
//!
//! Wire shape: each of these travels in a [`Message`](crate::messages::Message) envelope under
//! the matching [`MsgCode`](crate::messages::MsgCode). Vote payloads are accompanied by a
//! committed seal in the envelope, which the proposer aggregates into certificates.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::block::Block;
use crate::types::certificates::QuorumCert;
use crate::types::data_types::{Hash, View};

/// The proposer's PREPARE broadcast: the proposal for this view, justified by the proposer's
/// high QC (which must certify the proposal's parent).
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MsgPrepare {
    pub view: View,
    pub proposal: Block,
    pub high_qc: QuorumCert,
}

/// A phase vote: the digest of the proposal being voted on. The same payload shape serves the
/// PREPARE, PRE-COMMIT, and COMMIT voting phases; the envelope code tells them apart.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MsgVote {
    pub view: View,
    pub digest: Hash,
}

/// The proposer's PRE-COMMIT broadcast: the now committed-sealed proposal together with the
/// prepare QC built from a quorum of PREPARE votes.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MsgPreCommit {
    pub view: View,
    pub proposal: Block,
    pub prepare_qc: QuorumCert,
}

/// The proposer's COMMIT broadcast: the proposal together with the QC the validators must lock
/// on.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MsgCommit {
    pub view: View,
    pub proposal: Block,
    pub lock_qc: QuorumCert,
}
