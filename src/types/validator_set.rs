/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ordered validator roster and its proposer-selection policy.

use crate::types::data_types::{Address, Round};

/// Stores the identities of the validators of the current epoch, in canonical order, together
/// with a pointer to the proposer of the current round.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// address bytes. The genesis artifact sorts the initial roster the same way, which makes the
/// proposer of any round derivable by every correct validator from the roster and the round
/// number alone.
///
/// ## Snapshots
///
/// Handlers that need to compute a "next-proposer" without disturbing shared state clone the
/// set and call [`calc_proposer`](Self::calc_proposer) on the clone.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    // Addresses are kept in ascending order.
    validators: Vec<Address>,
    proposer: usize,
}

impl ValidatorSet {
    /// Create a new `ValidatorSet` from `validators`, sorting them into canonical order and
    /// removing duplicates. The initial proposer is the first validator in canonical order.
    pub fn new(mut validators: Vec<Address>) -> ValidatorSet {
        validators.sort();
        validators.dedup();
        Self {
            validators,
            proposer: 0,
        }
    }

    /// Get the number of validators in the set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Compute the quorum threshold Q = ⌈(2N+1)/3⌉: the minimum number of distinct signers that
    /// proves Byzantine-safe agreement for this set.
    pub fn quorum(&self) -> usize {
        (2 * self.validators.len() + 1).div_ceil(3)
    }

    /// Get the number of Byzantine validators the set tolerates: f = ⌊(N−1)/3⌋.
    pub fn faulty(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    /// Get the validators in canonical (ascending address) order.
    pub fn list(&self) -> &[Address] {
        &self.validators
    }

    /// Check whether `address` is a member of the validator set.
    pub fn contains(&self, address: &Address) -> bool {
        self.validators.binary_search(address).is_ok()
    }

    /// Look up `address` in the set, returning its canonical index and address, or `None` if it
    /// is not a member.
    pub fn get_by_address(&self, address: &Address) -> Option<(usize, Address)> {
        self.validators
            .binary_search(address)
            .ok()
            .map(|index| (index, self.validators[index]))
    }

    /// Get the proposer of the current round, as set by [`calc_proposer`](Self::calc_proposer).
    ///
    /// # Panics
    ///
    /// Panics if the validator set is empty. An empty set can never reach consensus, so engines
    /// refuse to start with one.
    pub fn proposer(&self) -> Address {
        self.validators[self.proposer]
    }

    /// Check whether `address` is the proposer of the current round.
    pub fn is_proposer(&self, address: &Address) -> bool {
        !self.is_empty() && self.proposer() == *address
    }

    /// Set the current proposer deterministically from `round`: the validator at canonical
    /// index `round mod N`.
    pub fn calc_proposer(&mut self, round: Round) {
        if !self.is_empty() {
            self.proposer = (round.int() % self.validators.len() as u64) as usize;
        }
    }
}
