use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Block, BlockInfo};
use crate::{bitfield::Bitfield, error::Error};

/// Frames larger than this are refused, the largest legitimate message is a
/// `piece` of one block or a `bitfield` of a huge torrent.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Core messages exchanged after a successful handshake.
/// These are from the vanilla protocol, with no extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum Core {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
}

/// The IDs of the [`Core`] messages.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CoreId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for CoreId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use CoreId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            id => return Err(Error::ProtocolViolation(format!("unknown message id {id}"))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CoreCodec;

impl From<Core> for BytesMut {
    fn from(val: Core) -> Self {
        let mut dst = BytesMut::new();
        let _ = CoreCodec.encode(val, &mut dst);
        dst
    }
}

impl Encoder<Core> for CoreCodec {
    type Error = Error;

    fn encode(&mut self, item: Core, buf: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Core::KeepAlive => {
                buf.put_u32(0);
            }
            Core::Choke => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Choke as u8);
            }
            Core::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Unchoke as u8);
            }
            Core::Interested => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Interested as u8);
            }
            Core::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(CoreId::NotInterested as u8);
            }
            Core::Have(piece_index) => {
                buf.put_u32(1 + 4);
                buf.put_u8(CoreId::Have as u8);
                buf.put_u32(piece_index);
            }
            Core::Bitfield(bitfield) => {
                let v = bitfield.into_vec();
                buf.put_u32(1 + v.len() as u32);
                buf.put_u8(CoreId::Bitfield as u8);
                buf.extend_from_slice(&v);
            }
            // <len=0013><id=6><index><begin><length>
            Core::Request(block) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(CoreId::Request as u8);
                block.encode(buf);
            }
            Core::Piece(block) => {
                buf.put_u32(1 + 4 + 4 + block.block.len() as u32);
                buf.put_u8(CoreId::Piece as u8);
                block.encode(buf);
            }
            Core::Cancel(block) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(CoreId::Cancel as u8);
                block.encode(buf);
            }
        }
        Ok(())
    }
}

/// Fail unless the payload of `id` has exactly `expected` bytes.
fn expect_payload(id: CoreId, payload: usize, expected: usize) -> Result<(), Error> {
    if payload != expected {
        return Err(Error::ProtocolViolation(format!(
            "{id:?} must carry {expected} bytes of payload, got {payload}"
        )));
    }
    Ok(())
}

impl Decoder for CoreCodec {
    type Item = Core;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // the message length header must be present at the minimum, otherwise
        // we can't determine the message type
        if buf.len() < 4 {
            return Ok(None);
        }

        // peek at length prefix without consuming
        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if size == 0 {
            buf.advance(4);
            return Ok(Some(Core::KeepAlive));
        }

        if size > MAX_MESSAGE_SIZE {
            return Err(Error::ProtocolViolation(format!(
                "message of {size} bytes is larger than the maximum of {MAX_MESSAGE_SIZE}"
            )));
        }

        // incomplete message, if the packet is to large to fit the MTU (~1,500
        // bytes) the packet will be split into many packets. The decoder will
        // be called each time a packet arrive, but if the buffer is not
        // full yet, we don't avance the cursor and just wait.
        if buf.len() < 4 + size {
            buf.reserve(4 + size - buf.len());
            return Ok(None);
        }

        // the whole frame is in the buffer from here on
        buf.advance(4);
        let msg_id = CoreId::try_from(buf.get_u8())?;
        let payload = size - 1;

        let msg = match msg_id {
            // <len=0001><id=0>
            CoreId::Choke => {
                expect_payload(msg_id, payload, 0)?;
                Core::Choke
            }

            // <len=0001><id=1>
            CoreId::Unchoke => {
                expect_payload(msg_id, payload, 0)?;
                Core::Unchoke
            }

            // <len=0001><id=2>
            CoreId::Interested => {
                expect_payload(msg_id, payload, 0)?;
                Core::Interested
            }

            // <len=0001><id=3>
            CoreId::NotInterested => {
                expect_payload(msg_id, payload, 0)?;
                Core::NotInterested
            }

            // <len=0005><id=4><piece index>
            CoreId::Have => {
                expect_payload(msg_id, payload, 4)?;
                Core::Have(buf.get_u32())
            }

            // <len=0001+X><id=5><bitfield>
            CoreId::Bitfield => {
                let bitfield = buf.copy_to_bytes(payload).to_vec();
                Core::Bitfield(Bitfield::from_vec(bitfield))
            }

            // <len=0013><id=6><index><begin><length>
            CoreId::Request => {
                expect_payload(msg_id, payload, 12)?;
                let index = buf.get_u32();
                let begin = buf.get_u32();
                let len = buf.get_u32();

                Core::Request(BlockInfo { index, begin, len })
            }

            // <len=0009+X><id=7><index><begin><block>
            CoreId::Piece => {
                if payload < 8 {
                    return Err(Error::ProtocolViolation(format!(
                        "piece message with {payload} bytes of payload"
                    )));
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();

                // size - 1 byte (msg_id) - 4 bytes (index) - 4 bytes (begin)
                let block = buf.copy_to_bytes(payload - 8).to_vec();

                Core::Piece(Block {
                    index,
                    begin,
                    block,
                })
            }

            // <len=0013><id=8><index><begin><length>
            CoreId::Cancel => {
                expect_payload(msg_id, payload, 12)?;
                let index = buf.get_u32();
                let begin = buf.get_u32();
                let len = buf.get_u32();

                Core::Cancel(BlockInfo { index, begin, len })
            }
        };

        Ok(Some(msg))
    }
}
