/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The error taxonomy shared by every component of the library.
//!
//! Handlers return a typed [`ConsensusError`]; the dispatcher logs and discards failed messages,
//! it never panics. The pacemaker is the sole retry mechanism: no handler retries internally.
//! [`ConsensusError::FutureBlock`] is the one error that carries enough information (a positive
//! delay) for the caller to schedule a retry.

use std::time::Duration;

use thiserror::Error;

/// Every way in which processing a consensus event can fail.
///
/// The variants group into the classes used throughout the library: decode errors, signer errors,
/// view errors, proposer errors, certificate errors, backend/chain errors, and fatal startup
/// errors. Apart from [`Fatal`](Self::Fatal), all of them are recoverable: the triggering message
/// is dropped and consensus state is left untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    /// A payload could not be deserialized. The inner string names the expected type.
    #[error("failed to decode {0}")]
    FailedDecode(&'static str),

    /// A message carried a code that the active engine does not handle.
    #[error("invalid message code")]
    InvalidMessage,

    /// The recovered signer is not a member of the validator set.
    #[error("invalid signer")]
    InvalidSigner,

    /// A signature did not recover to the claimed address, or is malformed.
    #[error("invalid signature")]
    InvalidSignature,

    /// The message belongs to a view that has already passed. Dropped.
    #[error("old message")]
    OldMessage,

    /// The message belongs to a future view. Stored in the backlog and replayed later.
    #[error("future message")]
    FutureMessage,

    /// A proposal or phase broadcast arrived from a validator that is not the round's proposer.
    #[error("message is not from the proposer of this round")]
    NotFromProposer,

    /// A vote arrived at a validator that is not its intended aggregator.
    #[error("message is not addressed to the proposer of this round")]
    NotToProposer,

    /// The proposal is structurally invalid or conflicts with an already accepted one.
    #[error("invalid proposal")]
    InvalidProposal,

    /// A vote failed its consistency checks against the local round state or high QC.
    #[error("invalid vote")]
    InvalidVote,

    /// A quorum certificate failed verification.
    #[error("failed to verify quorum certificate")]
    VerifyQc,

    /// A timeout certificate failed verification.
    #[error("failed to verify timeout certificate")]
    VerifyTc,

    /// The certificate justifying a proposal does not link it to its parent, or names the wrong
    /// proposer for its round.
    #[error("invalid high qc")]
    InvalidHighQc,

    /// The message's epoch does not match the local epoch, or its height falls outside the
    /// epoch's height range.
    #[error("invalid epoch")]
    InvalidEpoch,

    /// The block is on the bad-block list.
    #[error("bad block")]
    BadBlock,

    /// The block's transaction root disagrees with its transactions.
    #[error("mismatched transaction root")]
    MismatchTxRoot,

    /// The block's timestamp lies in the future. Carries the delay after which verification
    /// may be retried.
    #[error("future block, retry in {0:?}")]
    FutureBlock(Duration),

    /// The engine thread is no longer running.
    #[error("consensus engine stopped")]
    EngineStopped,

    /// Key material or storage could not be accessed at startup. Never swallowed: surfaced to
    /// the operator.
    #[error("fatal: {0}")]
    Fatal(String),
}
