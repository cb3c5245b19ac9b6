//! The metadata of a torrent, read from a decoded `.torrent` dictionary.
//!
//! ```text
//! d
//!   8:announce   <tracker url>
//!   4:info d
//!     6:length       <total bytes>
//!     4:name         <suggested file name>   (optional)
//!     12:piece length <bytes per piece>
//!     6:pieces       <20-byte SHA-1 per piece, concatenated>
//!   e
//! e
//! ```
use std::{fmt::Display, ops::Deref};

use sha1_smol::Sha1;
use speedy::{Readable, Writable};

use crate::{
    bencode::{decode_exact, encode, Value},
    error::Error,
};

/// SHA-1 hash of the bencoded `info` dictionary. This identifies the torrent
/// on the tracker and in the peer handshake.
#[derive(Clone, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Hash of the canonical encoding of `info`.
    pub fn of(info: &Value) -> Self {
        let mut hash = Sha1::new();
        hash.update(&encode(info));
        InfoHash(hash.digest().bytes())
    }
}

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s[..10])
    }
}

impl Deref for InfoHash {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<InfoHash> for [u8; 20] {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

/// Read-only view over the fields of a torrent needed to download it.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    /// URL of the tracker, kept as raw bytes.
    pub announce: Vec<u8>,
    /// Suggested name of the file.
    pub name: Option<Vec<u8>>,
    /// Number of bytes in each piece, the last piece may be shorter.
    pub piece_length: i64,
    /// Number of bytes of the entire file.
    pub length: i64,
    /// One SHA-1 hash for each piece, in order.
    pub piece_hashes: Vec<[u8; 20]>,
    pub info_hash: InfoHash,
}

fn required<'a>(dict: &'a Value, key: &str) -> Result<&'a Value, Error> {
    dict.get(key.as_bytes())
        .ok_or_else(|| Error::SchemaError(format!("missing `{key}`")))
}

fn required_bytes<'a>(dict: &'a Value, key: &str) -> Result<&'a [u8], Error> {
    required(dict, key)?
        .as_bytes()
        .ok_or_else(|| Error::SchemaError(format!("`{key}` must be a byte string")))
}

fn required_int(dict: &Value, key: &str) -> Result<i64, Error> {
    required(dict, key)?
        .as_integer()
        .ok_or_else(|| Error::SchemaError(format!("`{key}` must be an integer")))
}

impl TorrentMetadata {
    /// Decode a whole `.torrent` buffer and extract its metadata.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        Self::extract(&decode_exact(buf)?)
    }

    /// Walk a decoded torrent dictionary.
    ///
    /// The info-hash is computed from the `info` value exactly as it was
    /// decoded, re-encoded in canonical form, so unknown keys inside `info`
    /// are part of the hash as they should be.
    pub fn extract(torrent: &Value) -> Result<Self, Error> {
        if torrent.as_dict().is_none() {
            return Err(Error::SchemaError("torrent must be a dictionary".into()));
        }

        let announce = required_bytes(torrent, "announce")?.to_vec();

        let info = required(torrent, "info")?;
        if info.as_dict().is_none() {
            return Err(Error::SchemaError("`info` must be a dictionary".into()));
        }

        let length = required_int(info, "length")?;
        let piece_length = required_int(info, "piece length")?;
        let pieces = required_bytes(info, "pieces")?;
        let name = info.get(b"name").and_then(Value::as_bytes).map(Vec::from);

        if piece_length <= 0 {
            return Err(Error::SchemaError(format!(
                "`piece length` must be positive, got {piece_length}"
            )));
        }

        if length < 0 {
            return Err(Error::SchemaError(format!(
                "`length` cannot be negative, got {length}"
            )));
        }

        if pieces.len() % 20 != 0 {
            return Err(Error::SchemaError(format!(
                "`pieces` has {} bytes, which is not a multiple of 20",
                pieces.len()
            )));
        }

        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|c| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(c);
                hash
            })
            .collect();

        let expected = (length as u64).div_ceil(piece_length as u64);

        if piece_hashes.len() as u64 != expected {
            return Err(Error::SchemaError(format!(
                "torrent of {length} bytes in pieces of {piece_length} needs \
                 {expected} hashes, but `pieces` has {}",
                piece_hashes.len()
            )));
        }

        Ok(Self {
            announce,
            name,
            piece_length,
            length,
            piece_hashes,
            info_hash: InfoHash::of(info),
        })
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length in bytes of the piece at `index`, the last piece holds the
    /// remainder of the file.
    pub fn piece_len(&self, index: usize) -> Result<u32, Error> {
        self.check_index(index)?;

        let begin = index as i64 * self.piece_length;
        let len = self.piece_length.min(self.length - begin);

        u32::try_from(len)
            .map_err(|_| Error::SchemaError(format!("piece of {len} bytes is too large")))
    }

    pub fn piece_hash(&self, index: usize) -> Result<[u8; 20], Error> {
        self.check_index(index)?;
        Ok(self.piece_hashes[index])
    }

    fn check_index(&self, index: usize) -> Result<(), Error> {
        if index >= self.num_pieces() {
            return Err(Error::SchemaError(format!(
                "piece {index} is out of range, the torrent has {} pieces",
                self.num_pieces()
            )));
        }
        Ok(())
    }
}
