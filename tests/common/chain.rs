//! An in-memory chain database for integration tests.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use hotstuff_bft::types::block::{Block, Header};
use hotstuff_bft::types::data_types::{BlockHeight, Hash};
use hotstuff_bft::ChainReader;

/// A chain that lives in a `Vec`. Blocks enqueued by the consensus backend are inserted
/// directly and announced on the `inserted` channel, standing in for the node's block fetcher.
#[derive(Clone)]
pub(crate) struct MemChain {
    blocks: Arc<Mutex<Vec<Block>>>,
    inserted: Sender<()>,
}

impl MemChain {
    /// Create a chain holding only `genesis`. The returned receiver fires once per inserted
    /// block.
    pub(crate) fn new(genesis: Block) -> (MemChain, Receiver<()>) {
        let (inserted, inserted_rx) = mpsc::channel();
        (
            MemChain {
                blocks: Arc::new(Mutex::new(vec![genesis])),
                inserted,
            },
            inserted_rx,
        )
    }

    /// Insert a block the way the (out-of-scope) block propagation would, announcing it.
    pub(crate) fn insert(&self, block: Block) {
        let mut blocks = self.blocks.lock().unwrap();
        if blocks.iter().any(|known| known.hash() == block.hash()) {
            return;
        }
        assert_eq!(
            block.number().int(),
            blocks.len() as u64,
            "test chains grow one block at a time"
        );
        blocks.push(block);
        drop(blocks);
        let _ = self.inserted.send(());
    }

    pub(crate) fn height(&self) -> u64 {
        self.blocks.lock().unwrap().last().unwrap().number().int()
    }

    pub(crate) fn block_at(&self, number: u64) -> Option<Block> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.number().int() == number)
            .cloned()
    }
}

impl ChainReader for MemChain {
    fn current_block(&self) -> Block {
        self.blocks.lock().unwrap().last().unwrap().clone()
    }

    fn get_header(&self, hash: &Hash, number: BlockHeight) -> Option<Header> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.hash() == *hash && block.number() == number)
            .map(|block| block.header.clone())
    }

    fn get_header_by_number(&self, number: BlockHeight) -> Option<Header> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .find(|block| block.number() == number)
            .map(|block| block.header.clone())
    }

    fn has_bad_block(&self, _hash: &Hash) -> bool {
        false
    }

    fn enqueue_block(&self, block: Block) {
        self.insert(block);
    }
}
