/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Engine configuration.

use std::time::Duration;

use crate::types::data_types::{BlockHeight, Epoch};

/// Which of the two consensus engines drives this validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineVariant {
    /// The three-phase chained engine ([`crate::chained`]).
    Chained,
    /// The pipelined single-vote engine ([`crate::event_driven`]).
    EventDriven,
}

/// Configuration of a consensus core.
///
/// Construct with [`Config::builder`]. All parameters have workable defaults except that real
/// deployments will want to pick `base_timeout` to match their network latency.
#[derive(Clone, Debug)]
pub struct Config {
    /// The engine variant to run.
    pub variant: EngineVariant,
    /// Base round duration before exponential backoff.
    pub base_timeout: Duration,
    /// Backoff multiplier applied per consecutive timeout at the same height.
    pub backoff_factor: u32,
    /// The epoch this validator participates in. The validator set is constant per epoch.
    pub epoch: Epoch,
    /// First height of the epoch.
    pub epoch_start: BlockHeight,
    /// Number of heights in the epoch. Must be at least 1.
    pub epoch_length: u64,
}

impl Config {
    /// Start building a `Config` from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// The last height of the epoch (inclusive), so the epoch spans exactly
    /// [`epoch_length`](Self::epoch_length) heights.
    pub fn epoch_end(&self) -> BlockHeight {
        BlockHeight::new(
            self.epoch_start
                .int()
                .saturating_add(self.epoch_length.saturating_sub(1)),
        )
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            variant: EngineVariant::Chained,
            base_timeout: Duration::from_secs(2),
            backoff_factor: 2,
            epoch: Epoch::new(0),
            epoch_start: BlockHeight::new(0),
            epoch_length: u64::MAX,
        }
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn variant(mut self, variant: EngineVariant) -> ConfigBuilder {
        self.config.variant = variant;
        self
    }

    pub fn base_timeout(mut self, base_timeout: Duration) -> ConfigBuilder {
        self.config.base_timeout = base_timeout;
        self
    }

    pub fn backoff_factor(mut self, backoff_factor: u32) -> ConfigBuilder {
        self.config.backoff_factor = backoff_factor;
        self
    }

    pub fn epoch(mut self, epoch: Epoch) -> ConfigBuilder {
        self.config.epoch = epoch;
        self
    }

    pub fn epoch_start(mut self, epoch_start: BlockHeight) -> ConfigBuilder {
        self.config.epoch_start = epoch_start;
        self
    }

    pub fn epoch_length(mut self, epoch_length: u64) -> ConfigBuilder {
        self.config.epoch_length = epoch_length;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
