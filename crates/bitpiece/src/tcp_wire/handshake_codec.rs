//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Handshakes are only sent once at
//! the beginning of a connection, after which the connection is switched to
//! [`CoreCodec`](super::CoreCodec) keeping the read and write buffers.

use bytes::{Buf, BufMut, BytesMut};
use speedy::{BigEndian, Readable, Writable};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{error::Error, metainfo::InfoHash, peer::PeerId, tcp_wire::PSTR};

/// Length of a handshake on the wire.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

#[derive(Debug)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(&mut self, handshake: Handshake, buf: &mut BytesMut) -> Result<(), Error> {
        let Handshake {
            pstr_len,
            pstr,
            reserved,
            info_hash,
            peer_id,
        } = handshake;

        // we should only be sending the bittorrent protocol string
        debug_assert_eq!(pstr_len, 19);
        debug_assert_eq!(pstr, PSTR);

        buf.reserve(HANDSHAKE_LEN);
        buf.put_u8(pstr_len);
        buf.extend_from_slice(&pstr);
        buf.extend_from_slice(&reserved);
        buf.extend_from_slice(&info_hash.0);
        buf.extend_from_slice(&peer_id.0);

        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Handshake>, Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek, a wrong length prefix can be refused before the rest arrives
        if buf[0] as usize != PSTR.len() {
            warn!("! handshake with wrong pstr_len {}", buf[0]);
            return Err(Error::HandshakeMismatch);
        }

        if buf.len() < HANDSHAKE_LEN {
            buf.reserve(HANDSHAKE_LEN - buf.len());
            return Ok(None);
        }

        let handshake = Handshake::deserialize(&buf[..HANDSHAKE_LEN])?;
        buf.advance(HANDSHAKE_LEN);

        if handshake.pstr != PSTR {
            warn!("! handshake with wrong pstr, dropping connection");
            return Err(Error::HandshakeMismatch);
        }

        Ok(Some(handshake))
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// (`BitTorrent protocol`) or the info hash differs from ours, the connection
/// is severed. The reserved field is 8 zero bytes, no extensions are
/// advertised. The peer id is usually the client name and version.
#[derive(Clone, Debug, PartialEq, Writable, Readable)]
pub struct Handshake {
    pub pstr_len: u8,
    pub pstr: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: impl Into<[u8; 20]>, peer_id: impl Into<[u8; 20]>) -> Self {
        Self {
            pstr_len: PSTR.len() as u8,
            pstr: PSTR,
            reserved: [0u8; 8],
            info_hash: InfoHash(info_hash.into()),
            peer_id: PeerId(peer_id.into()),
        }
    }

    pub fn serialize(&self) -> Result<[u8; HANDSHAKE_LEN], Error> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        let temp = self.write_to_vec_with_ctx(BigEndian {})?;

        buf.copy_from_slice(&temp[..]);

        Ok(buf)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        Ok(Self::read_from_buffer_with_ctx(BigEndian {}, buf)?)
    }

    /// Check the handshake `target` received from a peer against ours.
    pub fn validate(&self, target: &Self) -> Result<(), Error> {
        if target.pstr_len != 19 {
            warn!("! handshake with wrong pstr_len, dropping connection");
            return Err(Error::HandshakeMismatch);
        }
        if target.pstr != PSTR {
            warn!("! handshake with wrong pstr, dropping connection");
            return Err(Error::HandshakeMismatch);
        }
        if self.info_hash != target.info_hash {
            warn!("! info_hash from receiving handshake does not match ours");
            return Err(Error::HandshakeMismatch);
        }
        Ok(())
    }
}
