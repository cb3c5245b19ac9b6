//! Assembly of the blocks of a single piece.
use sha1_smol::Sha1;

use crate::{
    bitfield::{Bitfield, BitfieldExt},
    error::Error,
    tcp_wire::{Block, BlockInfo},
};

/// Buffer of one piece, allocated to its exact length, and the set of
/// blocks already written into it.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceBuffer {
    index: u32,
    block_len: u32,
    data: Vec<u8>,
    received: Bitfield,
}

impl PieceBuffer {
    pub fn new(index: u32, piece_len: u32, block_len: u32) -> Self {
        let block_len = block_len.max(1);
        let num_blocks = piece_len.div_ceil(block_len) as usize;

        Self {
            index,
            block_len,
            data: vec![0u8; piece_len as usize],
            received: Bitfield::zeroed(num_blocks),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn num_blocks(&self) -> usize {
        self.received.len()
    }

    /// Every block of the piece, in order.
    pub fn block_infos(&self) -> impl Iterator<Item = BlockInfo> {
        BlockInfo::split_piece(self.index, self.len() as u32, self.block_len)
    }

    /// The position of the block that starts at `begin`, if `begin` is the
    /// start of one of our blocks.
    pub fn slot(&self, begin: u32) -> Option<usize> {
        if begin % self.block_len != 0 || begin as usize >= self.len() {
            return None;
        }
        Some((begin / self.block_len) as usize)
    }

    pub fn has_block(&self, slot: usize) -> bool {
        self.received.has(slot)
    }

    /// Copy a block into the buffer at its offset.
    ///
    /// Returns false when this block had already been received, in which
    /// case the buffer is left untouched. A block that does not line up
    /// with one of our blocks is a protocol violation.
    pub fn add_block(&mut self, block: &Block) -> Result<bool, Error> {
        let info = BlockInfo::from(block);

        let Some(slot) = self.slot(block.begin) else {
            return Err(Error::ProtocolViolation(format!(
                "block {info:?} is not aligned to piece {}",
                self.index
            )));
        };

        let begin = block.begin as usize;
        let expected = self.block_len.min(self.len() as u32 - block.begin);

        if block.index != self.index || info.len != expected {
            return Err(Error::ProtocolViolation(format!(
                "block {info:?} does not match the expected length {expected} of piece {}",
                self.index
            )));
        }

        if self.received.has(slot) {
            return Ok(false);
        }

        self.data[begin..begin + block.block.len()]
            .copy_from_slice(&block.block);
        self.received.set(slot, true);

        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        self.received.all()
    }

    /// Whether the SHA-1 of the buffer is exactly `hash`.
    pub fn is_valid(&self, hash: &[u8; 20]) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(&self.data);
        hasher.digest().bytes() == *hash
    }

    /// Take the bytes out of the buffer, leaving it empty.
    pub fn take(&mut self) -> Vec<u8> {
        self.received.clear();
        std::mem::take(&mut self.data)
    }
}
