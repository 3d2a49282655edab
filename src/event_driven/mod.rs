/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event-driven pipelined HotStuff engine.
//!
//! One vote per round: the round's proposer broadcasts a proposal justified by its high QC (or,
//! after a timeout, by a timeout certificate), every validator votes once, and the next round's
//! proposer aggregates the votes into the next QC. Heights advance with certificates
//! (`(h, r) → (h+1, r+1)`), rounds alone advance with timeout certificates (`(h, r) → (h, r+1)`),
//! so the round counter is monotone across heights and consecutive rounds witness an
//! uninterrupted pipeline.
//!
//! ## Committing
//!
//! A block B1 commits once the three-chain B3 ← B2 ← B1 under the high QC was built in
//! consecutive rounds with the local lock sitting on B2 (the commit check runs before the lock
//! advances to the newest certificate, so the lock anchor is always the 2-chain block). The
//! pool is pruned at the committed block.
//!
//! ## Vote safety
//!
//! A validator never votes in a round it already voted in (`last_vote_round` is monotone), and
//! locks only ever move to higher views.

pub mod messages;

mod proposal;

mod timeout;

mod vote;

use std::time::Instant;

use crate::backend::Backend;
use crate::block_pool::BlockPool;
use crate::config::Config;
use crate::engine::StateMachine;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode};
use crate::pacemaker::{Pacemaker, TimeoutEvent};
use crate::round_state::RoundState;
use crate::signer::{self, Signer};
use crate::types::block::Block;
use crate::types::certificates::{QuorumCert, TimeoutCert};
use crate::types::crypto_primitives::Keypair;
use crate::types::data_types::{Address, BlockHeight, Epoch, Round, View};
use crate::types::validator_set::ValidatorSet;

use crate::messages::MsgNewRound;

/// A single validator running the pipelined protocol.
pub struct EventDrivenEngine<B: Backend> {
    config: Config,
    backend: B,
    signer: Signer,
    address: Address,
    valset: ValidatorSet,
    current: RoundState,
    pool: BlockPool,
    pacemaker: Pacemaker,
    lock_qc: QuorumCert,
    last_vote_round: Option<Round>,
    last_tc: Option<TimeoutCert>,
    pending_request: Option<Block>,
}

impl<B: Backend> EventDrivenEngine<B> {
    /// Create an engine resuming from the backend's chain head.
    pub(crate) fn new(
        config: Config,
        keypair: Keypair,
        backend: B,
    ) -> Result<Self, ConsensusError> {
        let signer = Signer::new(keypair);
        let address = signer.address();

        let (last, _) = backend.last_proposal();
        let last_round = last.round().unwrap_or(Round::new(0));
        // The chain head consumed its round; resume one past it. Genesis consumed none.
        let init_round = if last.number().int() == 0 {
            Round::new(0)
        } else {
            last_round + 1
        };
        let init_view = View::new(last.number() + 1, init_round);
        let valset = backend.validators(init_view.height);
        if valset.is_empty() {
            return Err(ConsensusError::Fatal(
                "cannot start consensus with an empty validator set".into(),
            ));
        }

        let high_qc = QuorumCert::from_sealed_block(&last)?;
        let lock_qc = high_qc.clone();
        let pool = BlockPool::new(high_qc, last);
        let pacemaker = Pacemaker::new(config.base_timeout, config.backoff_factor);
        let current = RoundState::new(init_view);

        Ok(EventDrivenEngine {
            config,
            backend,
            signer,
            address,
            valset,
            current,
            pool,
            pacemaker,
            lock_qc,
            last_vote_round: None,
            last_tc: None,
            pending_request: None,
        })
    }

    fn is_proposer(&self) -> bool {
        self.valset.is_proposer(&self.address)
    }

    /// Enter `view`: fresh round state, proposer recomputed, timer armed.
    fn start_round(&mut self, view: View) {
        self.valset = self.backend.validators(view.height);
        self.valset.calc_proposer(view.round);
        self.current = RoundState::new(view);
        self.pacemaker.start_round(view);

        log::debug!(
            "start_round, view: {}, proposer: {}",
            view,
            self.valset.proposer()
        );

        if self.is_proposer() {
            if let Err(err) = self.try_propose() {
                log::debug!("try_propose, view: {}, err: {}", view, err);
            }
        } else {
            self.send_new_round();
        }
    }

    /// A certificate advances the pipeline to `(height+1, round+1)`.
    fn advance_round_by_qc(&mut self, qc: &QuorumCert) {
        let target = View::new(qc.view.height + 1, qc.view.round + 1);
        if target > self.current.view() {
            log::debug!("advance round by qc, view: {}", target);
            self.last_tc = None;
            self.start_round(target);
        }
    }

    /// A timeout certificate advances the round at the same height.
    fn advance_round_by_tc(&mut self, tc: TimeoutCert) {
        if tc.view.height != self.current.height() || tc.view.round < self.current.round() {
            return;
        }
        let target = View::new(self.current.height(), tc.view.round + 1);
        log::debug!("advance round by tc, view: {}", target);
        self.last_tc = Some(tc);
        self.start_round(target);
    }

    /// Absorb a verified certificate: cache it, raise the high QC, attempt the three-chain
    /// commit, then move the lock. The commit check runs against the lock as it was before this
    /// certificate, so the lock anchor is the 2-chain block.
    fn process_certificate(&mut self, qc: &QuorumCert) -> Result<(), ConsensusError> {
        self.pool.add_qc(qc.clone());
        self.pool.update_high_qc(qc);

        self.try_commit()?;

        if qc.view > self.lock_qc.view {
            self.lock_qc = qc.clone();
        }
        Ok(())
    }

    /// Commit the tail of a completed three-chain, if there is one.
    fn try_commit(&mut self) -> Result<(), ConsensusError> {
        let committed = match self.pool.get_commit_block(&self.lock_qc.hash) {
            Some(block) => block.clone(),
            None => return Ok(()),
        };
        if self
            .backend
            .has_proposal(&committed.hash(), committed.number())
        {
            return Ok(());
        }

        log::info!(
            "commit, hash: {}, number: {}",
            committed.hash(),
            committed.number()
        );
        self.backend.commit(committed.clone())?;
        self.pool.prune(&committed.hash());
        Ok(())
    }

    /// Tell the round's proposer which QC we consider highest.
    fn send_new_round(&mut self) {
        let payload = MsgNewRound {
            view: self.current.view(),
            high_qc: self.pool.high_qc().clone(),
        };
        let msg = Message::signed(MsgCode::NewRound, &payload, &self.signer, None);
        if let Err(err) = self.backend.unicast(&self.valset, msg.encode()) {
            log::debug!("send_new_round, err: {}", err);
        }
    }

    /// A peer entered a new round; adopt its high QC and catch up if it is ahead of us.
    fn handle_new_round(&mut self, src: Address, msg: &Message) -> Result<(), ConsensusError> {
        let payload: MsgNewRound = msg.decode_payload("new round")?;
        if payload.view < self.current.view() {
            return Err(ConsensusError::OldMessage);
        }
        signer::verify_qc(&payload.high_qc, &self.valset)?;

        log::trace!("handle_new_round, src: {}, view: {}", src, payload.view);
        self.process_certificate(&payload.high_qc)?;
        self.advance_round_by_qc(&payload.high_qc);
        Ok(())
    }

    /// An out-of-band certificate: verify, absorb, advance.
    fn handle_qc(&mut self, src: Address, msg: &Message) -> Result<(), ConsensusError> {
        let qc: QuorumCert = msg.decode_payload("quorum certificate")?;
        if qc.is_timeout_cert() {
            return Err(ConsensusError::VerifyQc);
        }
        signer::verify_qc(&qc, &self.valset)?;

        log::trace!("handle_qc, src: {}, view: {}", src, qc.view);
        self.process_certificate(&qc)?;
        self.advance_round_by_qc(&qc);
        Ok(())
    }

    /// Epoch bounds: the message must belong to our epoch and its height to the epoch's range.
    fn check_epoch(&self, epoch: Epoch, height: BlockHeight) -> Result<(), ConsensusError> {
        if epoch != self.config.epoch {
            return Err(ConsensusError::InvalidEpoch);
        }
        if height < self.config.epoch_start || height > self.config.epoch_end() {
            return Err(ConsensusError::InvalidEpoch);
        }
        Ok(())
    }

    /// Classify `view` against the current one.
    fn check_view(&self, view: View) -> Result<(), ConsensusError> {
        let current = self.current.view();
        if view < current {
            Err(ConsensusError::OldMessage)
        } else if view > current {
            Err(ConsensusError::FutureMessage)
        } else {
            Ok(())
        }
    }

    fn check_from_proposer(&self, src: Address) -> Result<(), ConsensusError> {
        if self.valset.is_proposer(&src) {
            Ok(())
        } else {
            Err(ConsensusError::NotFromProposer)
        }
    }

    fn broadcast(&self, msg: &Message) {
        if let Err(err) = self.backend.broadcast(&self.valset, msg.encode()) {
            log::debug!("broadcast, code: {}, err: {}", msg.code, err);
        }
    }
}

impl<B: Backend> StateMachine for EventDrivenEngine<B> {
    fn start(&mut self) {
        let view = self.current.view();
        self.start_round(view);
    }

    fn current_view(&self) -> View {
        self.current.view()
    }

    fn validators(&self) -> &ValidatorSet {
        &self.valset
    }

    fn deadline(&self) -> Instant {
        self.pacemaker.deadline()
    }

    fn handle_request(&mut self, block: Block) -> Result<(), ConsensusError> {
        if block.number() < self.current.height() {
            return Err(ConsensusError::OldMessage);
        }
        self.pending_request = Some(block);
        if self.is_proposer() {
            self.try_propose()?;
        }
        Ok(())
    }

    fn handle_message(&mut self, src: Address, msg: Message) -> Result<(), ConsensusError> {
        match msg.code {
            MsgCode::NewRound => self.handle_new_round(src, &msg),
            MsgCode::Proposal => self.handle_proposal(src, &msg),
            MsgCode::Vote => self.handle_vote(src, &msg),
            MsgCode::Timeout => self.handle_timeout_msg(src, &msg),
            MsgCode::Qc => self.handle_qc(src, &msg),
            MsgCode::Tc => self.handle_tc(src, &msg),
            _ => Err(ConsensusError::InvalidMessage),
        }
    }

    fn handle_timeout(&mut self) {
        self.pacemaker.on_timeout();

        let view = self.current.view();
        log::debug!("view timeout, view: {}", view);

        let event = TimeoutEvent::new(self.config.epoch, view);
        let seal = self.signer.timeout_seal(&view);
        let msg = Message::signed(MsgCode::Timeout, &event, &self.signer, Some(seal));
        self.broadcast(&msg);
    }

    fn handle_final_committed(&mut self) {
        let (last, _) = self.backend.last_proposal();
        if last.number() >= self.current.height() {
            log::debug!(
                "final committed, hash: {}, number: {}",
                last.hash(),
                last.number()
            );
            self.pool.prune(&last.hash());
            self.start_round(View::new(last.number() + 1, self.current.round()));
        }
    }
}
