/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pool of pending proposals and certificates.
//!
//! The pool is a forest keyed by block hash. Each node carries the block, the round it was
//! proposed in, and links to its children. On top of the forest sit the certificate cache
//! (`qc_map`), the high QC (the highest-round QC known), and the high proposal (the block the
//! high QC certifies, or the highest proposal seen).
//!
//! ## Invariant
//!
//! Every node's parent is either in the pool or already committed to the chain (a
//! garbage-collected ancestor). [`prune`](BlockPool::prune) maintains this by keeping exactly
//! the subtree rooted at the committed block.

use std::collections::HashMap;

use crate::types::block::Block;
use crate::types::certificates::QuorumCert;
use crate::types::data_types::{BlockHeight, Hash, Round};

struct PoolNode {
    block: Block,
    round: Round,
    children: Vec<Hash>,
}

/// Caches pending proposals and quorum certificates between proposal and commit.
pub struct BlockPool {
    nodes: HashMap<Hash, PoolNode>,
    qc_map: HashMap<Hash, QuorumCert>,
    high_qc: QuorumCert,
    high_proposal: Block,
}

impl BlockPool {
    /// Create a new `BlockPool` rooted at `init_block` (the last committed block) with
    /// `init_high_qc` (the certificate embedded in it) as the initial high QC.
    pub fn new(init_high_qc: QuorumCert, init_block: Block) -> BlockPool {
        let root_hash = init_block.hash();
        let root_round = init_block.round().unwrap_or(Round::new(0));
        let mut nodes = HashMap::new();
        nodes.insert(
            root_hash,
            PoolNode {
                block: init_block.clone(),
                round: root_round,
                children: Vec::new(),
            },
        );
        let mut qc_map = HashMap::new();
        qc_map.insert(init_high_qc.hash, init_high_qc.clone());
        BlockPool {
            nodes,
            qc_map,
            high_qc: init_high_qc,
            high_proposal: init_block,
        }
    }

    /// The highest-round quorum certificate known.
    pub fn high_qc(&self) -> &QuorumCert {
        &self.high_qc
    }

    /// The block certified by the high QC, or the highest proposal seen.
    pub fn high_proposal(&self) -> &Block {
        &self.high_proposal
    }

    /// Insert `block` into the pool under `round`.
    ///
    /// Idempotent: inserting a block that is already present replaces the stored rendition (a
    /// sealed and an unsealed rendition share the same hash) and keeps the node's links intact.
    pub fn add_block(&mut self, block: Block, round: Round) {
        let hash = block.hash();
        if let Some(node) = self.nodes.get_mut(&hash) {
            node.block = block;
            return;
        }

        let parent = block.parent_hash();
        self.nodes.insert(
            hash,
            PoolNode {
                block,
                round,
                children: Vec::new(),
            },
        );
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if !parent_node.children.contains(&hash) {
                parent_node.children.push(hash);
            }
        }
    }

    /// Get the block identified by `hash`, if it is in the pool.
    pub fn get_block_by_hash(&self, hash: &Hash) -> Option<&Block> {
        self.nodes.get(hash).map(|node| &node.block)
    }

    /// Get the block identified by `hash` iff its height is `expected_height`.
    pub fn get_block_and_check_height(
        &self,
        hash: &Hash,
        expected_height: BlockHeight,
    ) -> Option<&Block> {
        self.get_block_by_hash(hash)
            .filter(|block| block.number() == expected_height)
    }

    /// Get the block identified by `hash` iff it was proposed in `expected_round`.
    pub fn get_block_and_check_round(
        &self,
        hash: &Hash,
        expected_round: Round,
    ) -> Option<&Block> {
        self.nodes
            .get(hash)
            .filter(|node| node.round == expected_round)
            .map(|node| &node.block)
    }

    /// Get a block together with the round it was proposed in.
    pub fn block_with_round(&self, hash: &Hash) -> Option<(&Block, Round)> {
        self.nodes.get(hash).map(|node| (&node.block, node.round))
    }

    /// Check whether the pool holds a block with `hash`.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Cache `qc` under the hash of the proposal it certifies, if no certificate for that hash
    /// is cached yet.
    pub fn add_qc(&mut self, qc: QuorumCert) {
        self.qc_map.entry(qc.hash).or_insert(qc);
    }

    /// Get the cached certificate for the proposal identified by `hash`.
    pub fn get_qc_by_hash(&self, hash: &Hash) -> Option<&QuorumCert> {
        self.qc_map.get(hash)
    }

    /// Replace the high QC with `qc` if `qc` is for a strictly higher view. Within an epoch
    /// rounds are monotone across heights, so this is the round comparison everywhere except at
    /// the genesis bootstrap, where only the height distinguishes the first certificate from
    /// the genesis one. Timeout certificates never become the high QC. When the high QC
    /// changes, the high proposal is refreshed by hash lookup.
    pub fn update_high_qc(&mut self, qc: &QuorumCert) {
        if qc.is_timeout_cert() {
            return;
        }
        if qc.view > self.high_qc.view {
            self.high_qc = qc.clone();
            if let Some(block) = self.get_block_by_hash(&qc.hash) {
                self.high_proposal = block.clone();
            }
        }
    }

    /// Replace the high proposal with `proposal` if it does not regress in height. Re-submitting
    /// the current high proposal is a no-op.
    pub fn update_high_proposal(&mut self, proposal: Block) {
        if proposal.number() < self.high_proposal.number() {
            return;
        }
        if proposal.hash() == self.high_proposal.hash() {
            return;
        }
        self.high_proposal = proposal;
    }

    /// Resolve the three-chain commit rule: with the high QC certifying B3, and B3 ← B2 ← B1
    /// its height-checked ancestors in the pool, B1 is committable iff the three were proposed
    /// in consecutive rounds and the local lock (`lock_qc_hash`) sits on B2.
    pub fn get_commit_block(&self, lock_qc_hash: &Hash) -> Option<&Block> {
        let (b3, r3) = self.block_with_round(&self.high_qc.hash)?;
        let parent_height = BlockHeight::new(b3.number().int().checked_sub(1)?);
        let (b2, r2) = self
            .block_with_round(&b3.parent_hash())
            .filter(|(b2, _)| b2.number() == parent_height)?;
        let grand_height = BlockHeight::new(b2.number().int().checked_sub(1)?);
        let (b1, r1) = self
            .block_with_round(&b2.parent_hash())
            .filter(|(b1, _)| b1.number() == grand_height)?;

        let consecutive = r1 + 1 == r2 && r2 + 1 == r3;
        if consecutive && b2.hash() == *lock_qc_hash {
            Some(b1)
        } else {
            None
        }
    }

    /// Drop every branch that does not descend from `committed_hash`, which becomes the new
    /// root. Certificates for dropped blocks are evicted with them.
    pub fn prune(&mut self, committed_hash: &Hash) {
        if !self.nodes.contains_key(committed_hash) {
            return;
        }

        let mut keep = Vec::new();
        let mut frontier = vec![*committed_hash];
        while let Some(hash) = frontier.pop() {
            keep.push(hash);
            if let Some(node) = self.nodes.get(&hash) {
                frontier.extend_from_slice(&node.children);
            }
        }

        self.nodes.retain(|hash, _| keep.contains(hash));
        self.qc_map.retain(|hash, _| keep.contains(hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{chain_of, signers, valset_of};

    #[test]
    fn add_block_is_idempotent() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let (blocks, qcs) = chain_of(&signers, &valset, 2);
        let mut pool = BlockPool::new(qcs[0].clone(), blocks[0].clone());

        pool.add_block(blocks[1].clone(), Round::new(0));
        pool.add_block(blocks[1].clone(), Round::new(0));

        assert_eq!(pool.nodes.len(), 2);
        assert_eq!(
            pool.nodes[&blocks[0].hash()].children,
            vec![blocks[1].hash()]
        );
    }

    #[test]
    fn high_qc_is_monotone_by_round() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let (blocks, qcs) = chain_of(&signers, &valset, 3);
        let mut pool = BlockPool::new(qcs[0].clone(), blocks[0].clone());
        pool.add_block(blocks[1].clone(), Round::new(0));
        pool.add_block(blocks[2].clone(), Round::new(1));

        pool.update_high_qc(&qcs[2]);
        assert_eq!(pool.high_qc(), &qcs[2]);
        assert_eq!(pool.high_proposal().hash(), blocks[2].hash());

        // A certificate for an older round is a no-op.
        pool.update_high_qc(&qcs[1]);
        assert_eq!(pool.high_qc(), &qcs[2]);
    }

    #[test]
    fn high_proposal_never_regresses() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let (blocks, qcs) = chain_of(&signers, &valset, 3);
        let mut pool = BlockPool::new(qcs[0].clone(), blocks[0].clone());

        pool.update_high_proposal(blocks[2].clone());
        assert_eq!(pool.high_proposal().hash(), blocks[2].hash());

        pool.update_high_proposal(blocks[1].clone());
        assert_eq!(pool.high_proposal().hash(), blocks[2].hash());
    }

    #[test]
    fn three_chain_with_consecutive_rounds_commits() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        // Heights 1..=3 proposed in rounds 0, 1, 2.
        let (blocks, qcs) = chain_of(&signers, &valset, 4);
        let mut pool = BlockPool::new(qcs[0].clone(), blocks[0].clone());
        for height in 1..=3 {
            pool.add_block(blocks[height].clone(), Round::new(height as u64 - 1));
        }
        pool.update_high_qc(&qcs[3]);

        // Locked on B2: B1 commits.
        let committed = pool.get_commit_block(&blocks[2].hash()).unwrap();
        assert_eq!(committed.hash(), blocks[1].hash());

        // Locked elsewhere: nothing commits.
        assert!(pool.get_commit_block(&blocks[3].hash()).is_none());
    }

    #[test]
    fn three_chain_with_round_gap_does_not_commit() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let (blocks, qcs) = chain_of(&signers, &valset, 4);
        let mut pool = BlockPool::new(qcs[0].clone(), blocks[0].clone());
        pool.add_block(blocks[1].clone(), Round::new(0));
        // A timeout separated heights 2 and 3.
        pool.add_block(blocks[2].clone(), Round::new(1));
        pool.add_block(blocks[3].clone(), Round::new(3));
        pool.update_high_qc(&qcs[3]);

        assert!(pool.get_commit_block(&blocks[2].hash()).is_none());
    }

    #[test]
    fn prune_keeps_only_the_committed_subtree() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let (blocks, qcs) = chain_of(&signers, &valset, 3);
        let mut pool = BlockPool::new(qcs[0].clone(), blocks[0].clone());
        pool.add_block(blocks[1].clone(), Round::new(0));
        pool.add_block(blocks[2].clone(), Round::new(1));
        pool.add_qc(qcs[1].clone());
        pool.add_qc(qcs[2].clone());

        pool.prune(&blocks[1].hash());

        assert!(!pool.contains(&blocks[0].hash()));
        assert!(pool.contains(&blocks[1].hash()));
        assert!(pool.contains(&blocks[2].hash()));
        assert!(pool.get_qc_by_hash(&blocks[1].hash()).is_some());
    }

    #[test]
    fn round_checked_lookup() {
        let signers = signers(4);
        let valset = valset_of(&signers);
        let (blocks, qcs) = chain_of(&signers, &valset, 2);
        let mut pool = BlockPool::new(qcs[0].clone(), blocks[0].clone());
        pool.add_block(blocks[1].clone(), Round::new(4));

        assert!(pool
            .get_block_and_check_round(&blocks[1].hash(), Round::new(4))
            .is_some());
        assert!(pool
            .get_block_and_check_round(&blocks[1].hash(), Round::new(3))
            .is_none());
    }
}
