/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The PREPARE phase: proposing, validating proposals, and aggregating PREPARE votes into the
//! prepare QC.

use crate::backend::Backend;
use crate::engine::StateMachine;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode};
use crate::round_state::State;
use crate::signer;
use crate::types::data_types::Address;

use super::messages::{MsgPrepare, MsgVote};
use super::ChainedEngine;

impl<B: Backend> ChainedEngine<B> {
    /// Broadcast the PREPARE for this round if we are its proposer and have something to
    /// propose: the locked block if this height is locked, the pending request otherwise.
    pub(super) fn try_propose(&mut self) -> Result<(), ConsensusError> {
        if self.current.state() != State::AcceptRequest || self.current.proposal().is_some() {
            return Ok(());
        }

        // A locked height re-proposes the locked block, keeping its original proposer seal but
        // shedding the committed seals of the interrupted exchange (a fresh PREPARE carries
        // none; the hash is unaffected). Otherwise the pending request is sealed and proposed.
        let locked = self
            .current
            .lock_qc()
            .and_then(|lock| self.pool.get_block_by_hash(&lock.hash))
            .cloned();
        let proposal = match locked {
            Some(locked) => {
                let extra = locked.header.extra()?.sans_committed_seals();
                locked.with_header(locked.header.with_extra(&extra))
            }
            None => {
                let request = match self
                    .current
                    .pending_request()
                    .filter(|request| request.number() == self.current.height())
                    .cloned()
                {
                    Some(request) => request,
                    // Nothing to propose yet; the request event will retrigger us.
                    None => return Ok(()),
                };
                if request.coinbase() != self.address {
                    return Err(ConsensusError::InvalidProposal);
                }
                request.with_header(self.signer.seal_header(&request.header)?)
            }
        };

        let view = self.current.view();
        self.current.set_proposal(proposal.clone());
        self.pool.add_block(proposal.clone(), view.round);

        let payload = MsgPrepare {
            view,
            proposal,
            high_qc: self.pool.high_qc().clone(),
        };
        let msg = Message::signed(MsgCode::Prepare, &payload, &self.signer, None);
        log::debug!("send_prepare, view: {}, hash: {}", view, payload.proposal.hash());
        self.broadcast(&msg);
        Ok(())
    }

    /// Validate the proposer's PREPARE and answer it with a PREPARE vote.
    pub(super) fn handle_prepare(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let payload: MsgPrepare = msg.decode_payload("prepare")?;
        self.check_view(payload.view)?;
        self.check_from_proposer(src)?;

        let proposal = payload.proposal;
        if proposal.number() != self.current.height() {
            return Err(ConsensusError::InvalidProposal);
        }

        // The proposer equivocated within the view: force a round change.
        if let Some(accepted) = self.current.proposal() {
            if accepted.hash() != proposal.hash() {
                log::warn!(
                    "conflicting proposal in view {}, accepted: {}, got: {}",
                    payload.view,
                    accepted.hash(),
                    proposal.hash()
                );
                self.handle_timeout();
                return Err(ConsensusError::InvalidProposal);
            }
            // Duplicate of the accepted proposal.
            return Ok(());
        }

        // The justifying QC must certify the proposal's parent.
        if self.current.height().int() > 1 {
            if payload.high_qc.hash != proposal.parent_hash() {
                return Err(ConsensusError::InvalidHighQc);
            }
        }
        signer::verify_qc(&payload.high_qc, &self.valset)?;

        self.backend.verify(&proposal)?;
        signer::verify_header(&proposal.header, &self.valset, false)?;

        // A lock on this height binds us to the locked block.
        if let Some(lock) = self.current.lock_qc() {
            if lock.hash != proposal.hash() {
                return Err(ConsensusError::InvalidProposal);
            }
        }

        log::trace!(
            "handle_prepare, src: {}, view: {}, hash: {}",
            src,
            payload.view,
            proposal.hash()
        );

        self.pool.add_qc(payload.high_qc.clone());
        self.pool.update_high_qc(&payload.high_qc);
        self.pool.add_block(proposal.clone(), payload.view.round);
        self.current.set_proposal(proposal.clone());

        if !self.is_proposer() {
            let digest = proposal.hash();
            let vote = MsgVote {
                view: payload.view,
                digest,
            };
            let seal = self.signer.committed_seal(&digest);
            let msg = Message::signed(MsgCode::PrepareVote, &vote, &self.signer, Some(seal));
            log::trace!("send_prepare_vote, view: {}, digest: {}", payload.view, digest);
            self.broadcast(&msg);
        }
        Ok(())
    }

    /// Aggregate a PREPARE vote; at quorum, seal the proposal, build the prepare QC, and
    /// broadcast the PRE-COMMIT.
    pub(super) fn handle_prepare_vote(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let vote: MsgVote = msg.decode_payload("prepare vote")?;
        self.check_view(vote.view)?;
        self.check_to_proposer()?;
        self.check_vote_digest(&vote)?;
        if msg.committed_seal.is_none() {
            return Err(ConsensusError::InvalidVote);
        }

        if !self.current.add_prepare_vote(src, msg.clone()) {
            return Ok(());
        }
        log::trace!(
            "handle_prepare_vote, src: {}, view: {}, count: {}",
            src,
            vote.view,
            self.current.prepare_vote_size()
        );

        if self.current.prepare_vote_size() >= self.valset.quorum()
            && self.current.state() < State::Prepared
        {
            let proposal = self
                .current
                .proposal()
                .cloned()
                .ok_or(ConsensusError::InvalidProposal)?;
            let seals = self.current.prepare_vote_seals(self.valset.quorum());

            let (sealed, prepare_qc) =
                self.backend.pre_commit(vote.view, &proposal, seals)?;

            self.current.set_proposal(sealed.clone());
            self.current.set_prepare_qc(prepare_qc.clone());
            self.current.set_state(State::Prepared);
            self.pool.add_block(sealed.clone(), vote.view.round);
            self.pool.add_qc(prepare_qc.clone());
            self.pool.update_high_qc(&prepare_qc);

            let payload = super::messages::MsgPreCommit {
                view: vote.view,
                proposal: sealed,
                prepare_qc,
            };
            let msg = Message::signed(MsgCode::PreCommit, &payload, &self.signer, None);
            log::debug!("send_pre_commit, view: {}, hash: {}", vote.view, vote.digest);
            self.broadcast(&msg);
        }
        Ok(())
    }

    /// A vote must name the proposal accepted in this round.
    pub(super) fn check_vote_digest(&self, vote: &MsgVote) -> Result<(), ConsensusError> {
        match self.current.proposal() {
            Some(proposal) if proposal.hash() == vote.digest => Ok(()),
            _ => Err(ConsensusError::InvalidVote),
        }
    }
}
