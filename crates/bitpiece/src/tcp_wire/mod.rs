//! The "TCP Wire" protocol between Peers in the network.
//!
//! A connection starts with a fixed size [`Handshake`], after which every
//! message is framed as `<u32 big-endian length><u8 id><payload>`.
pub mod codec;
pub mod handshake_codec;

pub use codec::*;
pub use handshake_codec::*;

use bytes::{BufMut, BytesMut};

/// The default block_len that most clients support, some clients drop
/// the connection on blocks larger than this value.
///
/// The last block of a piece might be smaller.
pub const BLOCK_LEN: u32 = 16384;

/// Protocol String
/// String identifier of the string "BitTorrent protocol", in bytes.
pub const PSTR: [u8; 19] = *b"BitTorrent protocol";

/// A Block is a subset of a Piece,
/// pieces are subsets of the entire Torrent data.
///
/// When peers send data (seed) to us, they send us Blocks.
/// This happens on the "Piece" message of the peer wire protocol.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    /// The index of the piece this block belongs to.
    pub index: u32,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's data. 16 KiB most of the times,
    /// but the last block of a piece *might* be smaller.
    pub block: Vec<u8>,
}

impl Block {
    /// Encodes the block in the network binary protocol's format into the
    /// given buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index);
        buf.put_u32(self.begin);
        buf.extend_from_slice(&self.block);
    }
}

/// The representation of a [`Block`].
///
/// When we ask a peer to give us a [`Block`], we send this struct,
/// using the "Request" message of the tcp wire protocol.
///
/// This is almost identical to the [`Block`] struct,
/// the only difference is that instead of having a `block`,
/// we have a `len` representing the len of the block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    /// The index of the piece of which this is a block.
    pub index: u32,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's length in bytes. <= 16 KiB
    pub len: u32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            index: 0,
            begin: 0,
            len: BLOCK_LEN,
        }
    }
}

impl From<&Block> for BlockInfo {
    fn from(val: &Block) -> Self {
        BlockInfo {
            index: val.index,
            begin: val.begin,
            len: val.block.len() as u32,
        }
    }
}

impl BlockInfo {
    pub fn new(index: u32, begin: u32, len: u32) -> Self {
        Self { index, begin, len }
    }

    /// Encodes the block info in the network binary protocol's format into the
    /// given buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index);
        buf.put_u32(self.begin);
        buf.put_u32(self.len);
    }

    /// Split a piece of `piece_len` bytes into blocks of `block_len`, the
    /// last block holds the remainder.
    pub fn split_piece(
        index: u32,
        piece_len: u32,
        block_len: u32,
    ) -> impl Iterator<Item = BlockInfo> {
        (0..piece_len)
            .step_by(block_len.max(1) as usize)
            .map(move |begin| BlockInfo::new(index, begin, block_len.min(piece_len - begin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_piece() {
        let blocks: Vec<_> = BlockInfo::split_piece(3, BLOCK_LEN * 2 + 100, BLOCK_LEN).collect();

        assert_eq!(
            blocks,
            vec![
                BlockInfo::new(3, 0, BLOCK_LEN),
                BlockInfo::new(3, BLOCK_LEN, BLOCK_LEN),
                BlockInfo::new(3, BLOCK_LEN * 2, 100),
            ]
        );

        let blocks: Vec<_> = BlockInfo::split_piece(0, BLOCK_LEN * 2, BLOCK_LEN).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].len, BLOCK_LEN);

        assert_eq!(BlockInfo::split_piece(0, 0, BLOCK_LEN).count(), 0);
    }

    #[test]
    fn block_info_from_block() {
        let block = Block {
            index: 1,
            begin: BLOCK_LEN,
            block: vec![7; 10],
        };
        assert_eq!(BlockInfo::from(&block), BlockInfo::new(1, BLOCK_LEN, 10));
    }

    #[test]
    fn pstr() {
        assert_eq!(PSTR.len(), 19);
        assert_eq!(&PSTR, b"BitTorrent protocol");
    }
}
