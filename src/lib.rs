/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rust implementation of the HotStuff consensus protocol for permissioned blockchains.
//!
//! This library replicates a blockchain among a fixed validator set, tolerating up to f Byzantine
//! validators out of n ≥ 3f+1 under partial synchrony. Two engines coexist and share the same
//! foundations, selected through [`Config`](config::Config):
//!
//! 1. The **chained** engine ([`chained`]) drives every block through explicit
//!    PREPARE → PRE-COMMIT → COMMIT phases, building a quorum certificate between phases.
//! 2. The **event-driven** engine ([`event_driven`]) collapses the phases into a single vote per
//!    round, advancing through quorum certificates and timeout certificates and committing with
//!    the three-chain rule.
//!
//! Both engines are driven by a single-threaded dispatcher ([`engine`]) and reach the outside
//! world exclusively through the narrow [`Backend`](backend::Backend) capability, which bridges
//! to the peer-to-peer transport and the chain database. The library does not assemble block
//! bodies, execute transactions, or gossip blocks; those belong to the surrounding node.

pub mod types;

pub mod errors;

pub mod messages;

pub mod signer;

pub mod block_pool;

pub mod round_state;

pub mod pacemaker;

pub mod backend;

pub mod engine;

pub mod config;

pub mod chained;

pub mod event_driven;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports
pub use backend::{Backend, ChainReader, ConsensusBackend, Transport};
pub use config::{Config, EngineVariant};
pub use engine::{start_core, CoreEvent, CoreHandle};
pub use errors::ConsensusError;
