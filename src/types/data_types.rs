/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash as StdHash,
    ops::{Add, AddAssign},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// 20-byte account address of a validator.
///
/// Addresses are derived from secp256k1 public keys the Ethereum way: the last 20 bytes of the
/// Keccak-256 hash of the uncompressed public key (see
/// [`public_key_address`](super::crypto_primitives::public_key_address)).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, StdHash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct Address([u8; 20]);

impl Address {
    /// Create a new `Address` wrapping `bytes`.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 20]` value of this `Address`.
    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }

    /// The all-zeroes address. Used as the proposer of certificates that do not have one, e.g.,
    /// timeout certificates.
    pub const fn empty() -> Self {
        Self([0u8; 20])
    }

    /// Check whether this is the all-zeroes address.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// 32-byte Keccak-256 hash.
///
/// The zero hash is "empty" (∅): a quorum certificate whose hash is empty is a timeout
/// certificate in disguise, and an empty parent hash marks a genesis block.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, StdHash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a new `Hash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `Hash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// The all-zeroes hash (∅).
    pub const fn empty() -> Self {
        Self([0u8; 32])
    }

    /// Check whether this is the all-zeroes hash.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Height of a block in the chain. Starts at 0 for the genesis block and increases by 1 for
/// every committed descendant.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    StdHash,
    Default,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `BlockHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0 + rhs)
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs
    }
}

/// Consensus round number. In the chained engine, the attempt counter at a given height; in the
/// event-driven engine, a monotone counter that also selects proposers across heights.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    StdHash,
    Default,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Round(u64);

impl Round {
    /// Create a new `Round` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Round`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Round {
    type Output = Round;
    fn add(self, rhs: u64) -> Self::Output {
        Round::new(self.0 + rhs)
    }
}

/// Identifier of a fixed range of heights over which the validator set is constant.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, StdHash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct Epoch(u64);

impl Epoch {
    /// Create a new `Epoch` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Epoch`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The unit of consensus progress: a (height, round) pair.
///
/// Views are totally ordered lexicographically on (height, round), which the derived `Ord`
/// provides given the field order below.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    StdHash,
    Default,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct View {
    pub height: BlockHeight,
    pub round: Round,
}

impl View {
    /// Create a new `View` for the given `height` and `round`.
    pub const fn new(height: BlockHeight, round: Round) -> Self {
        Self { height, round }
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.height, self.round)
    }
}

/// 65-byte recoverable ECDSA signature (r ‖ s ‖ v).
///
/// The trailing byte is the recovery id, which lets
/// [`recover`](super::crypto_primitives::recover) compute the signer's address from the digest
/// and signature alone.
#[derive(Clone, Copy, PartialEq, Eq, StdHash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 65]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 65]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 65] {
        self.0
    }

    /// The all-zeroes signature. Marks a seal slot that has not been filled yet.
    pub const fn empty() -> Self {
        Self([0u8; 65])
    }

    /// Check whether this is the all-zeroes signature.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 65]
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}
