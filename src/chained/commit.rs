/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The COMMIT phase: locking, the final vote, and handing the decided block to the backend.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode};
use crate::round_state::State;
use crate::signer;
use crate::types::data_types::{Address, Round, View};

use super::messages::{MsgCommit, MsgVote};
use super::ChainedEngine;

impl<B: Backend> ChainedEngine<B> {
    /// Validate the proposer's COMMIT (the proposal plus the QC to lock on), lock, and answer
    /// with the final COMMIT vote.
    pub(super) fn handle_commit(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let payload: MsgCommit = msg.decode_payload("commit")?;
        self.check_view(payload.view)?;
        self.check_from_proposer(src)?;

        if payload.proposal.hash() != payload.lock_qc.hash {
            return Err(ConsensusError::InvalidProposal);
        }
        signer::verify_qc(&payload.lock_qc, &self.valset)?;

        log::trace!(
            "handle_commit, src: {}, view: {}, hash: {}",
            src,
            payload.view,
            payload.lock_qc.hash
        );

        if !self.is_proposer() && self.current.state() < State::PreCommitted {
            self.current.set_proposal(payload.proposal.clone());
            self.current.set_lock_qc(payload.lock_qc.clone());
            self.current.set_state(State::PreCommitted);
            self.pool.add_block(payload.proposal.clone(), payload.view.round);
        }

        if self.current.state() < State::Committed {
            let digest = payload.lock_qc.hash;
            let vote = MsgVote {
                view: payload.view,
                digest,
            };
            let seal = self.signer.committed_seal(&digest);
            let msg = Message::signed(MsgCode::CommitVote, &vote, &self.signer, Some(seal));
            log::trace!("send_commit_vote, view: {}, digest: {}", payload.view, digest);
            self.broadcast(&msg);
        }
        Ok(())
    }

    /// Aggregate a COMMIT vote; at quorum, the proposal is decided: hand it to the backend and
    /// start the next height.
    pub(super) fn handle_commit_vote(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let vote: MsgVote = msg.decode_payload("commit vote")?;
        self.check_view(vote.view)?;
        self.check_to_proposer()?;
        self.check_vote_digest(&vote)?;

        if !self.current.add_commit_vote(src, msg.clone()) {
            return Ok(());
        }
        log::trace!(
            "handle_commit_vote, src: {}, view: {}, count: {}",
            src,
            vote.view,
            self.current.commit_vote_size()
        );

        if self.current.commit_vote_size() >= self.valset.quorum()
            && self.current.state() < State::Committed
        {
            let proposal = self
                .current
                .proposal()
                .cloned()
                .ok_or(ConsensusError::InvalidProposal)?;

            self.current.set_state(State::Committed);
            log::info!(
                "commit, view: {}, hash: {}, number: {}",
                vote.view,
                proposal.hash(),
                proposal.number()
            );

            self.backend.commit(proposal.clone())?;
            self.pool.prune(&proposal.hash());
            self.start_new_round(View::new(proposal.number() + 1, Round::new(0)));
        }
        Ok(())
    }
}
