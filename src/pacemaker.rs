/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round timing: one live deadline per round, with exponential backoff under repeated timeouts.
//!
//! The dispatcher waits for events with `recv_timeout` against [`Pacemaker::deadline`]; when the
//! wait expires, the engine's timeout path runs. Because the deadline is a value rather than an
//! armed timer, advancing the round replaces it atomically and a stale round can never fire
//! into a later one.
//!
//! On fire, the engine signs and broadcasts a [`TimeoutEvent`]; Q matching timeout seals
//! aggregate into a timeout certificate, which advances the round.

use std::time::{Duration, Instant};

use borsh::{to_vec, BorshDeserialize, BorshSerialize};

use crate::types::crypto_primitives::keccak256;
use crate::types::data_types::{BlockHeight, Epoch, Hash, View};

const ENCODING_FAILED: &str = "borsh encoding of an in-memory value cannot fail";

/// A validator's declaration that its round timer fired at `view`.
///
/// `digest` identifies the event: the Keccak-256 hash of (epoch, view). The seal proving the
/// timeout travels in the carrying message's committed-seal slot and signs the
/// [(view, ∅) preimage](crate::signer::timeout_seal_message), which is what timeout-certificate
/// verification checks.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct TimeoutEvent {
    pub epoch: Epoch,
    pub view: View,
    pub digest: Hash,
}

impl TimeoutEvent {
    /// Create the `TimeoutEvent` for `view` in `epoch`.
    pub fn new(epoch: Epoch, view: View) -> TimeoutEvent {
        let digest = keccak256(&to_vec(&(epoch, view)).expect(ENCODING_FAILED));
        TimeoutEvent {
            epoch,
            view,
            digest,
        }
    }
}

/// Drives round deadlines.
///
/// The timeout for a round is `base * factor^k`, where `k` counts consecutive timeouts at the
/// same height. Advancing to a new height resets `k`; each fired timeout increases it and
/// re-arms the deadline, so a stalled network backs off instead of spinning.
pub struct Pacemaker {
    base: Duration,
    backoff_factor: u32,
    height: BlockHeight,
    consecutive_timeouts: u32,
    deadline: Instant,
}

impl Pacemaker {
    /// Create a new `Pacemaker` with the given base round time and backoff factor.
    pub fn new(base: Duration, backoff_factor: u32) -> Pacemaker {
        Pacemaker {
            base,
            backoff_factor,
            height: BlockHeight::new(0),
            consecutive_timeouts: 0,
            deadline: Instant::now() + base,
        }
    }

    /// The instant at which the current round times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Arm the deadline for a newly started round. Entering a new height resets the backoff.
    pub fn start_round(&mut self, view: View) {
        if view.height > self.height {
            self.height = view.height;
            self.consecutive_timeouts = 0;
        }
        self.deadline = Instant::now() + self.current_duration();
    }

    /// Note that the current round timed out: increase the backoff and re-arm the deadline so
    /// the timeout path does not spin while quorum timeout seals are being collected.
    pub fn on_timeout(&mut self) {
        self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
        self.deadline = Instant::now() + self.current_duration();
    }

    fn current_duration(&self) -> Duration {
        let multiplier = self
            .backoff_factor
            .checked_pow(self.consecutive_timeouts)
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier)
    }
}
