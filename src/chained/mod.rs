/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The basic three-phase chained HotStuff engine.
//!
//! Within one round, a block moves through three voting phases, each closed by a quorum
//! certificate:
//!
//! ```text
//! AcceptRequest --[Prepare from proposer, verified]--> (voted)
//!    proposer, on Q PrepareVotes --[PreCommit with prepareQC]--> Prepared
//!    non-proposer, on PreCommit --> Prepared
//! Prepared, on Q PreCommitVotes --[Commit with lockQC]--> PreCommitted
//! PreCommitted, on Q CommitVotes --> Committed --> newRound(h+1, 0)
//! ```
//!
//! The proposer is the sole aggregator: votes are broadcast, but only the proposer forms
//! certificates and drives the phase broadcasts. Non-proposers reach the committed chain head
//! through the chain itself (the proposer's commit is propagated by the surrounding node) and
//! restart from `FinalCommitted`.
//!
//! A silent proposer is handled by the shared timeout path: Q timeout seals form a timeout
//! certificate, and the round restarts at round+1 with the same height. Within a height, the
//! lock survives round changes, and a proposer whose height is locked re-proposes the locked
//! block.

pub mod messages;

mod commit;

mod precommit;

mod prepare;

use std::time::Instant;

use crate::backend::Backend;
use crate::block_pool::BlockPool;
use crate::config::Config;
use crate::engine::StateMachine;
use crate::errors::ConsensusError;
use crate::messages::{Message, MsgCode, MsgNewRound};
use crate::pacemaker::{Pacemaker, TimeoutEvent};
use crate::round_state::RoundState;
use crate::signer::{self, Signer};
use crate::types::block::Block;
use crate::types::certificates::{QuorumCert, TimeoutCert};
use crate::types::crypto_primitives::Keypair;
use crate::types::data_types::{Address, Round, View};
use crate::types::validator_set::ValidatorSet;

/// A single validator running the chained three-phase protocol.
pub struct ChainedEngine<B: Backend> {
    config: Config,
    backend: B,
    signer: Signer,
    address: Address,
    valset: ValidatorSet,
    current: RoundState,
    pool: BlockPool,
    pacemaker: Pacemaker,
}

impl<B: Backend> ChainedEngine<B> {
    /// Create an engine resuming from the backend's chain head.
    pub(crate) fn new(
        config: Config,
        keypair: Keypair,
        backend: B,
    ) -> Result<Self, ConsensusError> {
        let signer = Signer::new(keypair);
        let address = signer.address();

        let (last, _) = backend.last_proposal();
        let init_view = View::new(last.number() + 1, Round::new(0));
        let valset = backend.validators(init_view.height);
        if valset.is_empty() {
            return Err(ConsensusError::Fatal(
                "cannot start consensus with an empty validator set".into(),
            ));
        }

        let high_qc = QuorumCert::from_sealed_block(&last)?;
        let pool = BlockPool::new(high_qc, last);
        let pacemaker = Pacemaker::new(config.base_timeout, config.backoff_factor);
        let current = RoundState::new(init_view);

        Ok(ChainedEngine {
            config,
            backend,
            signer,
            address,
            valset,
            current,
            pool,
            pacemaker,
        })
    }

    fn is_proposer(&self) -> bool {
        self.valset.is_proposer(&self.address)
    }

    /// Tear down the previous round state and enter `view`. The lock survives round changes at
    /// the same height; a pending request survives until its height is committed.
    fn start_new_round(&mut self, view: View) {
        let lock_qc = if view.height == self.current.height() {
            self.current.lock_qc().cloned()
        } else {
            None
        };
        let pending_request = self
            .current
            .take_pending_request()
            .filter(|request| request.number() >= view.height);

        self.valset = self.backend.validators(view.height);
        self.valset.calc_proposer(view.round);

        self.current = RoundState::new(view);
        if let Some(lock_qc) = lock_qc {
            self.current.set_lock_qc(lock_qc);
        }
        if let Some(request) = pending_request {
            self.current.set_pending_request(request);
        }

        self.pacemaker.start_round(view);
        log::debug!(
            "start_new_round, view: {}, proposer: {}",
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

    fn handle_new_round(&mut self, src: Address, msg: &Message) -> Result<(), ConsensusError> {
        let payload: MsgNewRound = msg.decode_payload("new round")?;
        if payload.view < self.current.view() {
            return Err(ConsensusError::OldMessage);
        }
        signer::verify_qc(&payload.high_qc, &self.valset)?;

        log::trace!("handle_new_round, src: {}, view: {}", src, payload.view);
        self.pool.add_qc(payload.high_qc.clone());
        self.pool.update_high_qc(&payload.high_qc);
        Ok(())
    }

    fn handle_qc(&mut self, src: Address, msg: &Message) -> Result<(), ConsensusError> {
        let qc: QuorumCert = msg.decode_payload("quorum certificate")?;
        if qc.is_timeout_cert() {
            return Err(ConsensusError::VerifyQc);
        }
        signer::verify_qc(&qc, &self.valset)?;

        log::trace!("handle_qc, src: {}, view: {}", src, qc.view);
        self.pool.add_qc(qc.clone());
        self.pool.update_high_qc(&qc);
        Ok(())
    }

    /// A validator (possibly us) timed out. Aggregate; at Q, form a TC and move to the next
    /// round.
    fn handle_timeout_msg(&mut self, src: Address, msg: &Message) -> Result<(), ConsensusError> {
        let event: TimeoutEvent = msg.decode_payload("timeout event")?;
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
            if let Err(err) = self.backend.broadcast(&self.valset, tc_msg.encode()) {
                log::debug!("broadcast tc, err: {}", err);
            }

            log::debug!("round change by local tc, view: {}", event.view);
            self.start_new_round(View::new(self.current.height(), round + 1));
        }
        Ok(())
    }

    /// A TC received out-of-band also advances the local round.
    fn handle_tc(&mut self, src: Address, msg: &Message) -> Result<(), ConsensusError> {
        let tc: TimeoutCert = msg.decode_payload("timeout certificate")?;
        signer::verify_tc(&tc, &self.valset)?;

        if tc.view.height != self.current.height() || tc.view.round < self.current.round() {
            return Err(ConsensusError::OldMessage);
        }

        log::debug!("round change by remote tc, src: {}, view: {}", src, tc.view);
        self.start_new_round(View::new(self.current.height(), tc.view.round + 1));
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

    /// Proposals and phase broadcasts must come from the round's proposer.
    fn check_from_proposer(&self, src: Address) -> Result<(), ConsensusError> {
        if self.valset.is_proposer(&src) {
            Ok(())
        } else {
            Err(ConsensusError::NotFromProposer)
        }
    }

    /// Votes are aggregated by the round's proposer only.
    fn check_to_proposer(&self) -> Result<(), ConsensusError> {
        if self.is_proposer() {
            Ok(())
        } else {
            Err(ConsensusError::NotToProposer)
        }
    }

    fn broadcast(&self, msg: &Message) {
        if let Err(err) = self.backend.broadcast(&self.valset, msg.encode()) {
            log::debug!("broadcast, code: {}, err: {}", msg.code, err);
        }
    }
}

impl<B: Backend> StateMachine for ChainedEngine<B> {
    fn start(&mut self) {
        let view = self.current.view();
        self.start_new_round(view);
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
        self.current.set_pending_request(block);
        if self.is_proposer() {
            self.try_propose()?;
        }
        Ok(())
    }

    fn handle_message(&mut self, src: Address, msg: Message) -> Result<(), ConsensusError> {
        match msg.code {
            MsgCode::NewRound => self.handle_new_round(src, &msg),
            MsgCode::Prepare => self.handle_prepare(src, &msg),
            MsgCode::PrepareVote => self.handle_prepare_vote(src, &msg),
            MsgCode::PreCommit => self.handle_pre_commit(src, &msg),
            MsgCode::PreCommitVote => self.handle_pre_commit_vote(src, &msg),
            MsgCode::Commit => self.handle_commit(src, &msg),
            MsgCode::CommitVote => self.handle_commit_vote(src, &msg),
            MsgCode::Timeout => self.handle_timeout_msg(src, &msg),
            MsgCode::Qc => self.handle_qc(src, &msg),
            MsgCode::Tc => self.handle_tc(src, &msg),
            MsgCode::Proposal | MsgCode::Vote => Err(ConsensusError::InvalidMessage),
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
            self.start_new_round(View::new(last.number() + 1, Round::new(0)));
        }
    }
}
