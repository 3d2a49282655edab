/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Payloads of the event-driven engine's messages.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::block::Block;
use crate::types::certificates::QuorumCert;
use crate::types::data_types::{Address, Epoch, Hash, View};

/// The proposer's once-per-round broadcast: the proposal for this view, justified by either the
/// proposer's high QC (normal path) or a timeout certificate travelling with an empty hash
/// (timeout path).
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MsgProposal {
    pub epoch: Epoch,
    pub view: View,
    pub proposal: Block,
    pub justify: QuorumCert,
}

/// The single vote a validator casts per round, unicast to the next round's proposer.
///
/// A vote carries up to three ancestors of the voted proposal so the recipient can evaluate the
/// three-chain commit rule without extra round trips; ancestors the voter does not know are
/// `None`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Vote {
    pub epoch: Epoch,
    pub hash: Hash,
    pub proposer: Address,
    pub view: View,
    pub parent_hash: Hash,
    pub parent_view: View,
    pub grand: Option<(Hash, View)>,
    pub great_grand: Option<(Hash, View)>,
}
