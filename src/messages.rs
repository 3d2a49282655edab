/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The signed message envelope exchanged between validators.
//!
//! Every consensus message travels as a [`Message`]: a type code, the borsh-encoded payload, the
//! sender's address, the sender's signature over (code, payload, address), and, for votes and
//! timeouts, a committed seal that aggregators later embed into certificates. Recipients verify
//! the signature before any protocol logic runs.
//!
//! Engine-specific payload types live with their engines ([`crate::chained::messages`],
//! [`crate::event_driven::messages`]); this module owns the envelope and the shared code space.

use std::fmt::{self, Display, Formatter};

use borsh::{to_vec, BorshDeserialize, BorshSerialize};

use crate::errors::ConsensusError;
use crate::signer::{check_signature, Signer};
use crate::types::certificates::{QuorumCert, TimeoutCert};
use crate::types::data_types::{Address, SignatureBytes, View};
use crate::types::validator_set::ValidatorSet;

const ENCODING_FAILED: &str = "borsh encoding of an in-memory value cannot fail";

/// The wire code of a consensus message. One code space serves both engines; the chained engine
/// uses the phase codes, the event-driven engine the pipelined codes, and both share `NewRound`,
/// `Timeout`, `Qc`, and `Tc`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub enum MsgCode {
    /// A validator entered a new round and reports its high QC to the round's proposer.
    NewRound,
    /// Chained engine: the proposer's PREPARE broadcast carrying the proposal.
    Prepare,
    /// Chained engine: a vote on the PREPARE broadcast.
    PrepareVote,
    /// Chained engine: the proposer's PRE-COMMIT broadcast carrying the prepare QC.
    PreCommit,
    /// Chained engine: a vote on the PRE-COMMIT broadcast.
    PreCommitVote,
    /// Chained engine: the proposer's COMMIT broadcast carrying the lock QC.
    Commit,
    /// Chained engine: the final vote; a quorum of these commits the block.
    CommitVote,
    /// Event-driven engine: the proposer's once-per-round proposal.
    Proposal,
    /// Event-driven engine: the single vote per round, unicast to the next proposer.
    Vote,
    /// A signed timeout event.
    Timeout,
    /// An out-of-band quorum certificate.
    Qc,
    /// An out-of-band timeout certificate.
    Tc,
}

impl Display for MsgCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgCode::NewRound => "MSG_NEW_ROUND",
            MsgCode::Prepare => "MSG_PREPARE",
            MsgCode::PrepareVote => "MSG_PREPARE_VOTE",
            MsgCode::PreCommit => "MSG_PRE_COMMIT",
            MsgCode::PreCommitVote => "MSG_PRE_COMMIT_VOTE",
            MsgCode::Commit => "MSG_COMMIT",
            MsgCode::CommitVote => "MSG_COMMIT_VOTE",
            MsgCode::Proposal => "MSG_PROPOSAL",
            MsgCode::Vote => "MSG_VOTE",
            MsgCode::Timeout => "MSG_TIMEOUT",
            MsgCode::Qc => "MSG_QC",
            MsgCode::Tc => "MSG_TC",
        };
        f.write_str(name)
    }
}

/// A signed consensus message.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Message {
    pub code: MsgCode,
    pub msg: Vec<u8>,
    pub address: Address,
    pub signature: SignatureBytes,
    pub committed_seal: Option<SignatureBytes>,
}

impl Message {
    /// Build and sign a message carrying `payload` under `code`. Votes and timeouts attach the
    /// `committed_seal` that proves the decision beyond the envelope signature.
    pub fn signed<T: BorshSerialize>(
        code: MsgCode,
        payload: &T,
        signer: &Signer,
        committed_seal: Option<SignatureBytes>,
    ) -> Message {
        let msg = to_vec(payload).expect(ENCODING_FAILED);
        let address = signer.address();
        let signature = signer.sign(&signed_bytes(code, &msg, address));
        Message {
            code,
            msg,
            address,
            signature,
            committed_seal,
        }
    }

    /// Serialize this message for transport.
    pub fn encode(&self) -> Vec<u8> {
        to_vec(self).expect(ENCODING_FAILED)
    }

    /// Deserialize a message from transport bytes.
    pub fn decode(bytes: &[u8]) -> Result<Message, ConsensusError> {
        Message::try_from_slice(bytes).map_err(|_| ConsensusError::FailedDecode("message"))
    }

    /// Verify this message's signature and the sender's membership in `valset`, returning the
    /// sender's address.
    pub fn verify(&self, valset: &ValidatorSet) -> Result<Address, ConsensusError> {
        check_signature(
            &signed_bytes(self.code, &self.msg, self.address),
            self.address,
            &self.signature,
        )?;
        if valset.get_by_address(&self.address).is_none() {
            return Err(ConsensusError::InvalidSigner);
        }
        Ok(self.address)
    }

    /// Decode this message's payload as `T`. `what` names the expected type for the error.
    pub fn decode_payload<T: BorshDeserialize>(
        &self,
        what: &'static str,
    ) -> Result<T, ConsensusError> {
        T::try_from_slice(&self.msg).map_err(|_| ConsensusError::FailedDecode(what))
    }

    /// Extract the view this message belongs to, decoding just enough of the payload to find
    /// it. The dispatcher uses this for its old/current/future classification before any engine
    /// logic runs.
    pub fn view(&self) -> Result<View, ConsensusError> {
        use crate::chained::messages::{MsgCommit, MsgPreCommit, MsgPrepare, MsgVote};
        use crate::event_driven::messages::{MsgProposal, Vote};
        use crate::pacemaker::TimeoutEvent;

        let view = match self.code {
            MsgCode::NewRound => self.decode_payload::<MsgNewRound>("new round")?.view,
            MsgCode::Prepare => self.decode_payload::<MsgPrepare>("prepare")?.view,
            MsgCode::PrepareVote | MsgCode::PreCommitVote | MsgCode::CommitVote => {
                self.decode_payload::<MsgVote>("vote")?.view
            }
            MsgCode::PreCommit => self.decode_payload::<MsgPreCommit>("pre-commit")?.view,
            MsgCode::Commit => self.decode_payload::<MsgCommit>("commit")?.view,
            MsgCode::Proposal => self.decode_payload::<MsgProposal>("proposal")?.view,
            MsgCode::Vote => self.decode_payload::<Vote>("pipelined vote")?.view,
            MsgCode::Timeout => self.decode_payload::<TimeoutEvent>("timeout event")?.view,
            MsgCode::Qc => self.decode_payload::<QuorumCert>("quorum certificate")?.view,
            MsgCode::Tc => self.decode_payload::<TimeoutCert>("timeout certificate")?.view,
        };
        Ok(view)
    }
}

fn signed_bytes(code: MsgCode, msg: &[u8], address: Address) -> Vec<u8> {
    to_vec(&(code, msg, address)).expect(ENCODING_FAILED)
}

/// Sent by a validator entering a new round to the round's proposer, reporting the highest QC
/// it knows so the proposer can extend the freshest prefix. Shared by both engines.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct MsgNewRound {
    pub view: View,
    pub high_qc: QuorumCert,
}
