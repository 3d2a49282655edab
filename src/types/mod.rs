/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across both consensus engines.
//!
//! Types specific to a single engine live in the "messages" submodules of their engines, e.g.,
//! [`crate::event_driven::messages`].

pub mod data_types;

pub mod crypto_primitives;

pub mod validator_set;

pub mod block;

pub mod certificates;
