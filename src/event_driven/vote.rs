/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Casting the once-per-round vote and aggregating votes into quorum certificates.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode};
use crate::round_state::State;
use crate::types::block::Block;
use crate::types::data_types::{Address, View};

use super::messages::Vote;
use super::EventDrivenEngine;

impl<B: Backend> EventDrivenEngine<B> {
    /// Vote for the proposal accepted this round and unicast the vote to the next round's
    /// proposer. A validator votes at most once per round: `last_vote_round` only moves
    /// forward.
    pub(super) fn send_vote(&mut self) -> Result<(), ConsensusError> {
        let view = self.current.view();
        if self
            .last_vote_round
            .is_some_and(|last| view.round <= last)
        {
            return Ok(());
        }
        let proposal = self
            .current
            .proposal()
            .cloned()
            .ok_or(ConsensusError::InvalidProposal)?;

        let vote = self.make_vote(&proposal, view);
        let seal = self.signer.committed_seal(&proposal.hash());
        let msg = Message::signed(MsgCode::Vote, &vote, &self.signer, Some(seal));

        let mut next = self.valset.clone();
        next.calc_proposer(view.round + 1);

        self.last_vote_round = Some(view.round);
        self.current.set_state(State::Voted);

        log::trace!(
            "send_vote, view: {}, hash: {}, to: {}",
            view,
            vote.hash,
            next.proposer()
        );
        if let Err(err) = self.backend.unicast(&next, msg.encode()) {
            log::debug!("send_vote, err: {}", err);
        }
        Ok(())
    }

    // The vote carries the ancestors we know of so the recipient can evaluate the three-chain
    // rule; ancestors outside the pool stay None.
    fn make_vote(&self, proposal: &Block, view: View) -> Vote {
        let lookup = |hash| {
            self.pool
                .block_with_round(&hash)
                .map(|(block, round)| (block, View::new(block.number(), round)))
        };

        let parent_view = lookup(proposal.parent_hash())
            .map(|(_, view)| view)
            .unwrap_or(self.pool.high_qc().view);
        let grand = lookup(proposal.parent_hash())
            .and_then(|(parent, _)| lookup(parent.parent_hash()))
            .map(|(block, view)| (block.hash(), view));
        let great_grand = grand
            .and_then(|(hash, _)| lookup(hash))
            .and_then(|(block, _)| lookup(block.parent_hash()))
            .map(|(block, view)| (block.hash(), view));

        Vote {
            epoch: self.config.epoch,
            hash: proposal.hash(),
            proposer: proposal.coinbase(),
            view,
            parent_hash: proposal.parent_hash(),
            parent_view,
            grand,
            great_grand,
        }
    }

    /// Aggregate a vote; at quorum, seal the proposal into a certificate, share it, and advance
    /// the pipeline.
    pub(super) fn handle_vote(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let vote: Vote = msg.decode_payload("pipelined vote")?;
        self.check_epoch(vote.epoch, vote.view.height)?;
        self.check_vote(&vote)?;
        if msg.committed_seal.is_none() {
            return Err(ConsensusError::InvalidVote);
        }

        if !self.current.add_vote(vote.hash, src, msg.clone()) {
            return Ok(());
        }
        let count = self.current.vote_size(&vote.hash);
        log::trace!(
            "handle_vote, src: {}, view: {}, hash: {}, count: {}",
            src,
            vote.view,
            vote.hash,
            count
        );
        if count != self.valset.quorum() {
            return Ok(());
        }

        let proposal = self
            .pool
            .get_block_and_check_height(&vote.hash, vote.view.height)
            .cloned()
            .ok_or(ConsensusError::InvalidProposal)?;
        let seals = self.current.vote_seals(&vote.hash, self.valset.quorum());
        let (sealed, qc) = self.backend.pre_commit(vote.view, &proposal, seals)?;

        self.pool.add_block(sealed.clone(), vote.view.round);
        self.pool.update_high_proposal(sealed);
        log::debug!("aggregate qc, view: {}, hash: {}", qc.view, qc.hash);

        // Share the fresh certificate so lagging validators advance too.
        let qc_msg = Message::signed(MsgCode::Qc, &qc, &self.signer, None);
        self.broadcast(&qc_msg);

        self.process_certificate(&qc)?;
        self.advance_round_by_qc(&qc);
        Ok(())
    }

    /// Structural checks on an incoming vote. The vote must advance the certified prefix by
    /// exactly one step: one height (certificate path) or one round (timeout path).
    fn check_vote(&self, vote: &Vote) -> Result<(), ConsensusError> {
        if vote.hash.is_empty() || vote.parent_hash.is_empty() {
            return Err(ConsensusError::InvalidVote);
        }
        if vote.parent_view >= vote.view {
            return Err(ConsensusError::InvalidVote);
        }

        let high = self.pool.high_qc().view;
        let height_advances = vote.view.height.int() == high.height.int() + 1;
        let round_advances = vote.view.round.int() == high.round.int() + 1;
        if !(height_advances || round_advances) {
            return Err(ConsensusError::InvalidVote);
        }
        Ok(())
    }
}
