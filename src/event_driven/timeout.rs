/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Aggregating timeouts into timeout certificates and advancing rounds with them.

use crate::backend::Backend;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode};
use crate::pacemaker::TimeoutEvent;
use crate::signer;
use crate::types::certificates::TimeoutCert;
use crate::types::data_types::Address;

use super::EventDrivenEngine;

impl<B: Backend> EventDrivenEngine<B> {
    /// A validator (possibly us) timed out. Aggregate; at Q, form a TC, share it, and advance
    /// to the next round.
    pub(super) fn handle_timeout_msg(
        &mut self,
        src: Address,
        msg: &Message,
    ) -> Result<(), ConsensusError> {
        let event: TimeoutEvent = msg.decode_payload("timeout event")?;
        self.check_epoch(event.epoch, event.view.height)?;
        if event.view.height != self.current.height() {
            return if event.view.height < self.current.height() {
                Err(ConsensusError::OldMessage)
            } else {
                Err(ConsensusError::FutureMessage)
            };
        }
        if event.view.round < self.current.round() {
            return Err(ConsensusError::OldMessage);
        }
        if msg.committed_seal.is_none() {
            return Err(ConsensusError::InvalidVote);
        }

        let round = event.view.round;
        if !self.current.add_timeout(round, src, msg.clone()) {
            return Ok(());
        }
        log::trace!(
            "handle_timeout_msg, src: {}, view: {}, count: {}",
            src,
            event.view,
            self.current.timeout_size(round)
        );

        if self.current.timeout_size(round) >= self.valset.quorum() {
            let seals = self.current.timeout_seals(round, self.valset.quorum());
            let tc = TimeoutCert::new(event.view, seals);

            let tc_msg = Message::signed(MsgCode::Tc, &tc, &self.signer, None);
            self.broadcast(&tc_msg);

            log::debug!("round change by local tc, view: {}", event.view);
            self.advance_round_by_tc(tc);
        }
        Ok(())
    }

    /// A TC received out-of-band also advances the local round.
    pub(super) fn handle_tc(&mut self, src: Address, msg: &Message) -> Result<(), ConsensusError> {
        let tc: TimeoutCert = msg.decode_payload("timeout certificate")?;
        signer::verify_tc(&tc, &self.valset)?;

        if tc.view.height != self.current.height() || tc.view.round < self.current.round() {
            return Err(ConsensusError::OldMessage);
        }

        log::debug!("round change by remote tc, src: {}, view: {}", src, tc.view);
        self.advance_round_by_tc(tc);
        Ok(())
    }
}
