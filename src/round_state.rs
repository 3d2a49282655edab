/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-round working set of a consensus engine.
//!
//! A [`RoundState`] is recreated on every round start and the previous one is discarded; only
//! the lock survives round changes (through the engines, which carry it over). Vote aggregators
//! deduplicate by signer, which is what makes a Byzantine double-vote a no-op.

use indexmap::IndexMap;

use crate::messages::Message;
use crate::types::block::Block;
use crate::types::certificates::QuorumCert;
use crate::types::data_types::{Address, BlockHeight, Hash, Round, SignatureBytes, View};

/// The phase a validator has reached within the current round.
///
/// One ordered scale serves both engines: the chained engine moves through
/// `AcceptRequest → Prepared → PreCommitted → Committed`, the event-driven engine through
/// `AcceptRequest → AcceptProposal → Voted`. In both, state is monotone within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    AcceptRequest,
    AcceptProposal,
    Voted,
    Prepared,
    PreCommitted,
    Committed,
}

/// A set of messages keyed and deduplicated by signer. Iteration order is insertion order, so
/// seal extraction is deterministic.
pub struct MessageSet {
    messages: IndexMap<Address, Message>,
}

impl MessageSet {
    fn new() -> MessageSet {
        MessageSet {
            messages: IndexMap::new(),
        }
    }

    /// Insert `msg` from `signer`. Returns `false` (and keeps the first message) if the signer
    /// already contributed one.
    fn insert(&mut self, signer: Address, msg: Message) -> bool {
        if self.messages.contains_key(&signer) {
            return false;
        }
        self.messages.insert(signer, msg);
        true
    }

    /// The number of distinct signers in the set.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Extract up to `n` committed seals from the collected messages, in insertion order.
    pub fn seals(&self, n: usize) -> Vec<SignatureBytes> {
        self.messages
            .values()
            .filter_map(|msg| msg.committed_seal)
            .take(n)
            .collect()
    }
}

/// The working set for the current (height, round).
pub struct RoundState {
    view: View,
    state: State,
    proposal: Option<Block>,
    pending_request: Option<Block>,
    prepare_qc: Option<QuorumCert>,
    lock_qc: Option<QuorumCert>,
    prepare_votes: MessageSet,
    pre_commit_votes: MessageSet,
    commit_votes: MessageSet,
    votes: IndexMap<Hash, MessageSet>,
    timeouts: IndexMap<Round, MessageSet>,
}

impl RoundState {
    /// Create a fresh `RoundState` for `view`, in `AcceptRequest` with empty aggregators.
    pub fn new(view: View) -> RoundState {
        RoundState {
            view,
            state: State::AcceptRequest,
            proposal: None,
            pending_request: None,
            prepare_qc: None,
            lock_qc: None,
            prepare_votes: MessageSet::new(),
            pre_commit_votes: MessageSet::new(),
            commit_votes: MessageSet::new(),
            votes: IndexMap::new(),
            timeouts: IndexMap::new(),
        }
    }

    /// The view this round state belongs to.
    pub fn view(&self) -> View {
        self.view
    }

    /// The height component of the view.
    pub fn height(&self) -> BlockHeight {
        self.view.height
    }

    /// The round component of the view.
    pub fn round(&self) -> Round {
        self.view.round
    }

    /// The phase reached within this round.
    pub fn state(&self) -> State {
        self.state
    }

    /// Advance to `state`. Regressions are ignored: state is monotone within a round.
    pub fn set_state(&mut self, state: State) {
        if state > self.state {
            self.state = state;
        }
    }

    /// The proposal accepted in this round, if any.
    pub fn proposal(&self) -> Option<&Block> {
        self.proposal.as_ref()
    }

    /// Accept `proposal` for this round (or replace it with its sealed rendition).
    pub fn set_proposal(&mut self, proposal: Block) {
        self.proposal = Some(proposal);
    }

    /// The block the local node was asked to get committed, waiting for its proposer turn.
    pub fn pending_request(&self) -> Option<&Block> {
        self.pending_request.as_ref()
    }

    /// Store a block to propose when this node's turn comes.
    pub fn set_pending_request(&mut self, request: Block) {
        self.pending_request = Some(request);
    }

    /// Move the pending request out of this round state (to carry it into the next round).
    pub fn take_pending_request(&mut self) -> Option<Block> {
        self.pending_request.take()
    }

    /// The prepare QC built or accepted in this round.
    pub fn prepare_qc(&self) -> Option<&QuorumCert> {
        self.prepare_qc.as_ref()
    }

    /// Record the prepare QC.
    pub fn set_prepare_qc(&mut self, qc: QuorumCert) {
        self.prepare_qc = Some(qc);
    }

    /// The certificate this validator is locked on.
    pub fn lock_qc(&self) -> Option<&QuorumCert> {
        self.lock_qc.as_ref()
    }

    /// Lock onto `qc`. The lock is monotone by round: a certificate for a lower round than the
    /// current lock is ignored.
    pub fn set_lock_qc(&mut self, qc: QuorumCert) {
        match &self.lock_qc {
            Some(lock) if qc.view.round <= lock.view.round => {}
            _ => self.lock_qc = Some(qc),
        }
    }

    /// Add a PREPARE vote from `signer`. Returns `false` on a duplicate.
    pub fn add_prepare_vote(&mut self, signer: Address, msg: Message) -> bool {
        self.prepare_votes.insert(signer, msg)
    }

    /// The number of distinct PREPARE voters.
    pub fn prepare_vote_size(&self) -> usize {
        self.prepare_votes.len()
    }

    /// Up to `n` committed seals from the PREPARE votes.
    pub fn prepare_vote_seals(&self, n: usize) -> Vec<SignatureBytes> {
        self.prepare_votes.seals(n)
    }

    /// Add a PRE-COMMIT vote from `signer`. Returns `false` on a duplicate.
    pub fn add_pre_commit_vote(&mut self, signer: Address, msg: Message) -> bool {
        self.pre_commit_votes.insert(signer, msg)
    }

    /// The number of distinct PRE-COMMIT voters.
    pub fn pre_commit_vote_size(&self) -> usize {
        self.pre_commit_votes.len()
    }

    /// Add a COMMIT vote from `signer`. Returns `false` on a duplicate.
    pub fn add_commit_vote(&mut self, signer: Address, msg: Message) -> bool {
        self.commit_votes.insert(signer, msg)
    }

    /// The number of distinct COMMIT voters.
    pub fn commit_vote_size(&self) -> usize {
        self.commit_votes.len()
    }

    /// Up to `n` committed seals from the COMMIT votes.
    pub fn commit_vote_seals(&self, n: usize) -> Vec<SignatureBytes> {
        self.commit_votes.seals(n)
    }

    /// Add an event-driven vote for the proposal identified by `hash`. Returns `false` on a
    /// duplicate from the same signer.
    pub fn add_vote(&mut self, hash: Hash, signer: Address, msg: Message) -> bool {
        self.votes
            .entry(hash)
            .or_insert_with(MessageSet::new)
            .insert(signer, msg)
    }

    /// The number of distinct voters for the proposal identified by `hash`.
    pub fn vote_size(&self, hash: &Hash) -> usize {
        self.votes.get(hash).map_or(0, MessageSet::len)
    }

    /// Up to `n` committed seals from the votes for `hash`.
    pub fn vote_seals(&self, hash: &Hash, n: usize) -> Vec<SignatureBytes> {
        self.votes.get(hash).map_or_else(Vec::new, |set| set.seals(n))
    }

    /// Add a timeout message for `round`. Returns `false` on a duplicate from the same signer.
    pub fn add_timeout(&mut self, round: Round, signer: Address, msg: Message) -> bool {
        self.timeouts
            .entry(round)
            .or_insert_with(MessageSet::new)
            .insert(signer, msg)
    }

    /// The number of distinct validators that timed out at `round`.
    pub fn timeout_size(&self, round: Round) -> usize {
        self.timeouts.get(&round).map_or(0, MessageSet::len)
    }

    /// Up to `n` timeout seals collected for `round`.
    pub fn timeout_seals(&self, round: Round, n: usize) -> Vec<SignatureBytes> {
        self.timeouts
            .get(&round)
            .map_or_else(Vec::new, |set| set.seals(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MsgCode;
    use crate::test_utils::signers;

    fn view() -> View {
        View::new(BlockHeight::new(1), Round::new(0))
    }

    fn vote_msg(signer: &crate::signer::Signer, digest: Hash) -> Message {
        let payload = crate::chained::messages::MsgVote {
            view: view(),
            digest,
        };
        Message::signed(
            MsgCode::PrepareVote,
            &payload,
            signer,
            Some(signer.committed_seal(&digest)),
        )
    }

    #[test]
    fn duplicate_votes_from_one_signer_are_ignored() {
        let signers = signers(4);
        let digest = Hash::new([1u8; 32]);
        let mut state = RoundState::new(view());

        assert!(state.add_prepare_vote(signers[1].address(), vote_msg(&signers[1], digest)));
        assert!(!state.add_prepare_vote(signers[1].address(), vote_msg(&signers[1], digest)));
        assert_eq!(state.prepare_vote_size(), 1);

        assert!(state.add_prepare_vote(signers[2].address(), vote_msg(&signers[2], digest)));
        assert_eq!(state.prepare_vote_size(), 2);
        assert_eq!(state.prepare_vote_seals(3).len(), 2);
    }

    #[test]
    fn conflicting_votes_aggregate_separately() {
        let signers = signers(4);
        let mut state = RoundState::new(view());
        let a = Hash::new([1u8; 32]);
        let b = Hash::new([2u8; 32]);

        assert!(state.add_vote(a, signers[1].address(), vote_msg(&signers[1], a)));
        // A Byzantine second vote for a different proposal in the same view: the per-hash set
        // dedups by signer, so no quorum can be reached on either hash with its help.
        assert!(state.add_vote(b, signers[1].address(), vote_msg(&signers[1], b)));
        assert!(!state.add_vote(a, signers[1].address(), vote_msg(&signers[1], a)));

        assert_eq!(state.vote_size(&a), 1);
        assert_eq!(state.vote_size(&b), 1);
    }

    #[test]
    fn state_only_advances() {
        let mut state = RoundState::new(view());
        state.set_state(State::Prepared);
        state.set_state(State::AcceptRequest);
        assert_eq!(state.state(), State::Prepared);
        state.set_state(State::Committed);
        assert_eq!(state.state(), State::Committed);
    }

    #[test]
    fn lock_is_monotone_by_round() {
        let mut state = RoundState::new(view());
        let qc = |round| QuorumCert {
            view: View::new(BlockHeight::new(1), Round::new(round)),
            hash: Hash::new([round as u8 + 1; 32]),
            proposer: Address::empty(),
            extra: Vec::new(),
        };

        state.set_lock_qc(qc(3));
        state.set_lock_qc(qc(2));
        assert_eq!(state.lock_qc().unwrap().view.round, Round::new(3));
        state.set_lock_qc(qc(5));
        assert_eq!(state.lock_qc().unwrap().view.round, Round::new(5));
    }
}
