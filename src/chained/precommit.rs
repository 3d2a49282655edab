/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The PRE-COMMIT phase: adopting the prepare QC and aggregating PRE-COMMIT votes into the
//! lock.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode};
use crate::round_state::State;
use crate::signer;
use crate::types::data_types::Address;

use super::messages::{MsgCommit, MsgPreCommit, MsgVote};
use super::ChainedEngine;

impl<B: Backend> ChainedEngine<B> {
    /// Validate the proposer's PRE-COMMIT (the sealed proposal plus its prepare QC), adopt it,
    /// and answer with a PRE-COMMIT vote.
    pub(super) fn handle_pre_commit(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let payload: MsgPreCommit = msg.decode_payload("pre-commit")?;
        self.check_view(payload.view)?;
        self.check_from_proposer(src)?;

        if payload.proposal.hash() != payload.prepare_qc.hash {
            return Err(ConsensusError::InvalidProposal);
        }
        self.backend.verify(&payload.proposal)?;
        signer::verify_qc(&payload.prepare_qc, &self.valset)?;

        log::trace!(
            "handle_pre_commit, src: {}, view: {}, hash: {}",
            src,
            payload.view,
            payload.prepare_qc.hash
        );

        if !self.is_proposer() && self.current.state() < State::Prepared {
            self.current.set_proposal(payload.proposal.clone());
            self.current.set_prepare_qc(payload.prepare_qc.clone());
            self.current.set_state(State::Prepared);
            self.pool.add_block(payload.proposal.clone(), payload.view.round);
            self.pool.add_qc(payload.prepare_qc.clone());
            self.pool.update_high_qc(&payload.prepare_qc);
        }

        if self.current.state() < State::PreCommitted {
            let digest = payload.prepare_qc.hash;
            let vote = MsgVote {
                view: payload.view,
                digest,
            };
            let seal = self.signer.committed_seal(&digest);
            let msg = Message::signed(MsgCode::PreCommitVote, &vote, &self.signer, Some(seal));
            log::trace!(
                "send_pre_commit_vote, view: {}, digest: {}",
                payload.view,
                digest
            );
            self.broadcast(&msg);
        }
        Ok(())
    }

    /// Aggregate a PRE-COMMIT vote; at quorum, lock on the prepare QC and broadcast the COMMIT.
    pub(super) fn handle_pre_commit_vote(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let vote: MsgVote = msg.decode_payload("pre-commit vote")?;
        self.check_view(vote.view)?;
        self.check_to_proposer()?;
        self.check_vote_digest(&vote)?;

        if !self.current.add_pre_commit_vote(src, msg.clone()) {
            return Ok(());
        }
        log::trace!(
            "handle_pre_commit_vote, src: {}, view: {}, count: {}",
            src,
            vote.view,
            self.current.pre_commit_vote_size()
        );

        if self.current.pre_commit_vote_size() >= self.valset.quorum()
            && self.current.state() < State::PreCommitted
        {
            let proposal = self
                .current
                .proposal()
                .cloned()
                .ok_or(ConsensusError::InvalidProposal)?;
            let lock_qc = self
                .current
                .prepare_qc()
                .cloned()
                .ok_or(ConsensusError::InvalidHighQc)?;

            self.current.set_lock_qc(lock_qc.clone());
            self.current.set_state(State::PreCommitted);

            let payload = MsgCommit {
                view: vote.view,
                proposal,
                lock_qc,
            };
            let msg = Message::signed(MsgCode::Commit, &payload, &self.signer, None);
            log::debug!("send_commit, view: {}, hash: {}", vote.view, vote.digest);
            self.broadcast(&msg);
        }
        Ok(())
    }
}
