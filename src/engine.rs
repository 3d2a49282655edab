/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single-threaded dispatcher that drives an engine.
//!
//! All consensus state belongs to one thread: the dispatcher loop reads a union of event
//! sources from a single mailbox and serializes message, timeout, request, and commit handling.
//! Transport and chain callbacks never touch engine state; they enqueue [`CoreEvent`]s through
//! the [`CoreHandle`].
//!
//! ## Message classification
//!
//! Before any protocol logic, an incoming payload is decoded and its signature verified; then
//! its view decides its fate: past-view messages are dropped, current-view messages are
//! dispatched, and future-view messages are parked in a bounded backlog that is replayed when
//! their view becomes current. Timeouts, certificates, and new-round reports may act ahead of
//! the local view and are delivered immediately.
//!
//! ## Timers
//!
//! The loop waits with `recv_timeout` against the engine's pacemaker deadline. A timeout is
//! therefore just another event in the same serialized stream, and there is exactly one live
//! timer per round by construction.

use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::backend::Backend;
use crate::chained::ChainedEngine;
use crate::config::{Config, EngineVariant};
use crate::errors::ConsensusError;
use crate::event_driven::EventDrivenEngine;
use crate::messages::{Message, MsgCode};
use crate::types::block::Block;
use crate::types::crypto_primitives::Keypair;
use crate::types::data_types::{Address, View};
use crate::types::validator_set::ValidatorSet;

/// Maximum number of future-view messages parked in the backlog.
const BACKLOG_CAPACITY: usize = 1024;

/// The union of events a consensus engine consumes.
pub enum CoreEvent {
    /// The local miner asks for `Block` to be committed.
    Request(Block),
    /// A raw payload arrived from the network (or from a local broadcast).
    Message(Vec<u8>),
    /// A previously future-view message whose view became current.
    Backlog(Address, Message),
    /// A new head reached the chain database.
    FinalCommitted,
    /// The round timer fired (injected by the loop itself, or by tests).
    Timeout,
    /// Shut the engine down.
    Stop,
}

/// The behavior common to both engines, as seen by the dispatcher.
pub(crate) trait StateMachine: Send {
    /// Enter the initial round.
    fn start(&mut self);

    /// The engine's current view.
    fn current_view(&self) -> View;

    /// The validator set messages are verified against.
    fn validators(&self) -> &ValidatorSet;

    /// The current round's deadline.
    fn deadline(&self) -> Instant;

    /// The miner asks for a block to be committed.
    fn handle_request(&mut self, block: Block) -> Result<(), ConsensusError>;

    /// A decoded, signature-checked message for this (or an actionable future) view.
    fn handle_message(&mut self, src: Address, msg: Message) -> Result<(), ConsensusError>;

    /// The round timer fired.
    fn handle_timeout(&mut self);

    /// The chain advanced underneath us.
    fn handle_final_committed(&mut self);
}

/// Handle to a running consensus core: the capability the backend (and the surrounding node)
/// holds. Cloneable; the engine itself is owned by its thread.
#[derive(Clone)]
pub struct CoreHandle {
    tx: Sender<CoreEvent>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CoreHandle {
    /// Feed a raw network payload to the engine.
    pub fn handle_message(&self, payload: Vec<u8>) -> Result<(), ConsensusError> {
        self.post(CoreEvent::Message(payload))
    }

    /// Enqueue an arbitrary event.
    pub fn post(&self, event: CoreEvent) -> Result<(), ConsensusError> {
        self.tx
            .send(event)
            .map_err(|_| ConsensusError::EngineStopped)
    }

    /// Stop the engine and wait for its thread to exit.
    pub fn stop(&self) {
        let _ = self.tx.send(CoreEvent::Stop);
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

/// Build the engine selected by `config.variant` and start its dispatcher thread.
///
/// Construction errors (key material, empty validator set, undecodable chain head) are fatal
/// and surfaced to the caller; nothing is spawned in that case.
pub fn start_core<B: Backend>(
    config: Config,
    keypair: Keypair,
    backend: B,
) -> Result<CoreHandle, ConsensusError> {
    let (tx, rx) = mpsc::channel();
    let self_tx = tx.clone();

    let builder = thread::Builder::new().name("hotstuff-core".into());
    let spawned = match config.variant {
        EngineVariant::Chained => {
            let engine = ChainedEngine::new(config, keypair, backend)?;
            builder.spawn(move || run(engine, rx, self_tx))
        }
        EngineVariant::EventDriven => {
            let engine = EventDrivenEngine::new(config, keypair, backend)?;
            builder.spawn(move || run(engine, rx, self_tx))
        }
    };
    let thread = spawned
        .map_err(|err| ConsensusError::Fatal(format!("failed to spawn consensus thread: {err}")))?;

    Ok(CoreHandle {
        tx,
        thread: Arc::new(Mutex::new(Some(thread))),
    })
}

fn run<S: StateMachine>(mut sm: S, rx: Receiver<CoreEvent>, self_tx: Sender<CoreEvent>) {
    let mut backlog = Backlog::new(BACKLOG_CAPACITY);
    sm.start();

    loop {
        let now = Instant::now();
        let deadline = sm.deadline();
        let event = if deadline <= now {
            CoreEvent::Timeout
        } else {
            match rx.recv_timeout(deadline - now) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => CoreEvent::Timeout,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        };

        match event {
            CoreEvent::Stop => return,
            CoreEvent::Timeout => sm.handle_timeout(),
            CoreEvent::FinalCommitted => sm.handle_final_committed(),
            CoreEvent::Request(block) => {
                if let Err(err) = sm.handle_request(block) {
                    log::debug!("request dropped, err: {}", err);
                }
            }
            CoreEvent::Message(payload) => {
                if let Err(err) = on_message(&mut sm, &payload, &mut backlog) {
                    log::trace!("message dropped, err: {}", err);
                }
            }
            CoreEvent::Backlog(src, msg) => {
                if let Err(err) = sm.handle_message(src, msg) {
                    log::trace!("backlog message dropped, err: {}", err);
                }
            }
        }

        backlog.replay(sm.current_view(), &self_tx);
    }
}

// Decode, verify, classify by view, then dispatch or park.
fn on_message<S: StateMachine>(
    sm: &mut S,
    payload: &[u8],
    backlog: &mut Backlog,
) -> Result<(), ConsensusError> {
    let msg = Message::decode(payload)?;
    let src = msg.verify(sm.validators())?;
    let view = msg.view()?;
    let current = sm.current_view();

    if view < current {
        return Err(ConsensusError::OldMessage);
    }

    // Timeouts, certificates, and new-round reports act across views; everything else waits for
    // its view.
    let acts_ahead = matches!(
        msg.code,
        MsgCode::Timeout | MsgCode::Qc | MsgCode::Tc | MsgCode::NewRound
    );
    if view > current && !acts_ahead {
        backlog.insert(view, src, msg);
        return Ok(());
    }

    match sm.handle_message(src, msg.clone()) {
        Err(ConsensusError::FutureMessage) => {
            backlog.insert(view, src, msg);
            Ok(())
        }
        other => other,
    }
}

/// Bounded store of future-view messages, keyed by view. When full, the farthest-future
/// messages give way first.
struct Backlog {
    capacity: usize,
    size: usize,
    buffer: BTreeMap<View, VecDeque<(Address, Message)>>,
}

impl Backlog {
    fn new(capacity: usize) -> Backlog {
        Backlog {
            capacity,
            size: 0,
            buffer: BTreeMap::new(),
        }
    }

    fn insert(&mut self, view: View, src: Address, msg: Message) {
        if self.size >= self.capacity {
            let farthest = match self.buffer.keys().next_back() {
                Some(farthest) => *farthest,
                None => return,
            };
            // The incoming message is the farthest out: drop it instead.
            if view >= farthest {
                return;
            }
            if let Some(queue) = self.buffer.get_mut(&farthest) {
                queue.pop_back();
                self.size -= 1;
                if queue.is_empty() {
                    self.buffer.remove(&farthest);
                }
            }
        }

        self.buffer.entry(view).or_default().push_back((src, msg));
        self.size += 1;
    }

    /// Drop messages for views that have passed and re-post the ones whose view is now
    /// current.
    fn replay(&mut self, current: View, post: &Sender<CoreEvent>) {
        let keep = self.buffer.split_off(&current);
        let expired: usize = self.buffer.values().map(VecDeque::len).sum();
        self.size -= expired;
        self.buffer = keep;

        if let Some(queue) = self.buffer.remove(&current) {
            self.size -= queue.len();
            for (src, msg) in queue {
                let _ = post.send(CoreEvent::Backlog(src, msg));
            }
        }
    }
}
