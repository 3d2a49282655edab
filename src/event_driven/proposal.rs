/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Proposing and validating once-per-round proposals.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode};
use crate::round_state::State;
use crate::signer;
use crate::types::certificates::{QuorumCert, TimeoutCert};
use crate::types::data_types::Address;

use super::messages::MsgProposal;
use super::EventDrivenEngine;

impl<B: Backend> EventDrivenEngine<B> {
    /// Broadcast this round's proposal if we are its proposer and the miner's request has
    /// arrived. The justifying certificate is the timeout certificate that opened this round,
    /// or the high QC on the normal path.
    pub(super) fn try_propose(&mut self) -> Result<(), ConsensusError> {
        if !self.is_proposer() || self.current.state() != State::AcceptRequest {
            return Ok(());
        }

        let view = self.current.view();
        let request = match self
            .pending_request
            .as_ref()
            .filter(|request| request.number() == view.height)
            .cloned()
        {
            Some(request) => request,
            // Nothing to propose yet; the request event will retrigger us.
            None => return Ok(()),
        };
        if request.coinbase() != self.address {
            return Err(ConsensusError::InvalidProposal);
        }

        let justify = match &self.last_tc {
            Some(tc) if tc.view.height == view.height && tc.view.round + 1 == view.round => {
                QuorumCert::from_timeout_cert(tc)
            }
            _ => self.pool.high_qc().clone(),
        };
        // Either way the proposal must extend the certified prefix.
        if request.parent_hash() != self.pool.high_qc().hash {
            return Err(ConsensusError::InvalidProposal);
        }

        // Stamp the view into the header extra and seal it.
        let mut extra = request.header.extra()?;
        extra.epoch = self.config.epoch;
        extra.round = view.round;
        let header = self.signer.seal_header(&request.header.with_extra(&extra))?;
        let proposal = request.with_header(header);

        let payload = MsgProposal {
            epoch: self.config.epoch,
            view,
            proposal: proposal.clone(),
            justify,
        };
        let msg = Message::signed(MsgCode::Proposal, &payload, &self.signer, None);
        log::debug!("send_proposal, view: {}, hash: {}", view, proposal.hash());
        self.broadcast(&msg);
        Ok(())
    }

    /// Validate a proposal, absorb its justifying certificate, and vote.
    pub(super) fn handle_proposal(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let payload: MsgProposal = msg.decode_payload("proposal")?;
        self.check_epoch(payload.epoch, payload.view.height)?;
        self.check_view(payload.view)?;
        self.check_from_proposer(src)?;

        let proposal = payload.proposal;
        let justify = payload.justify;

        // The view stamped into the header must be the view it was proposed in.
        let extra = proposal.header.extra()?;
        if proposal.number() != payload.view.height || extra.round != payload.view.round {
            return Err(ConsensusError::InvalidProposal);
        }

        if justify.is_timeout_cert() {
            // Timeout path: the TC must be the one that opened this round.
            let tc = TimeoutCert::from_qc(&justify)?;
            signer::verify_tc(&tc, &self.valset)?;
            if tc.view.height != payload.view.height
                || tc.view.round + 1 != payload.view.round
            {
                return Err(ConsensusError::InvalidHighQc);
            }
        } else {
            // Normal path: the certificate must link the proposal to its parent and carry the
            // proposer its round elects. The genesis certificate under height 1 carries no
            // seals and skips the structural checks.
            if payload.view.height.int() > 1 {
                if justify.view.height + 1 != proposal.number() {
                    return Err(ConsensusError::InvalidHighQc);
                }
                if justify.hash != proposal.parent_hash() {
                    return Err(ConsensusError::InvalidHighQc);
                }
                let mut elected = self.valset.clone();
                elected.calc_proposer(justify.view.round);
                if elected.proposer() != justify.proposer {
                    return Err(ConsensusError::InvalidHighQc);
                }
            }
            signer::verify_qc(&justify, &self.valset)?;
        }

        self.backend.verify(&proposal)?;
        signer::verify_header(&proposal.header, &self.valset, false)?;

        log::trace!(
            "handle_proposal, src: {}, view: {}, hash: {}",
            src,
            payload.view,
            proposal.hash()
        );

        if !justify.is_timeout_cert() {
            self.process_certificate(&justify)?;
        }

        self.pool.add_block(proposal.clone(), payload.view.round);
        self.pool.update_high_proposal(proposal.clone());
        self.current.set_proposal(proposal);
        self.current.set_state(State::AcceptProposal);

        self.send_vote()
    }
}
