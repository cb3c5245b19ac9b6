//! What we need from an HTTP tracker: the announce query and the compact
//! list of peers of its response. The HTTP request itself is left to the
//! caller.
use std::{
    fmt::Display,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use crate::{
    bencode::Value,
    error::Error,
    metainfo::{InfoHash, TorrentMetadata},
    peer::PeerId,
};

/// The port we announce when the caller does not pick one.
pub const DEFAULT_PORT: u16 = 6881;

/// An IPv4 peer, as found in a compact peer list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<PeerAddress> for SocketAddr {
    fn from(value: PeerAddress) -> Self {
        SocketAddr::V4(SocketAddrV4::new(value.ip, value.port))
    }
}

/// Parse the `peers` of a compact tracker response.
///
/// The addresses come in packets of 6 bytes, first 4 for the ip and 2 for
/// the port, both in network order.
pub fn parse_compact_peer_list(buf: &[u8]) -> Result<Vec<PeerAddress>, Error> {
    let chunks = buf.chunks_exact(6);
    if !chunks.remainder().is_empty() {
        return Err(Error::MalformedInput(format!(
            "compact peer list of {} bytes is not a multiple of 6",
            buf.len()
        )));
    }

    let peers = chunks
        .map(|hostport| {
            let (ip, port) = hostport.split_at(4);
            PeerAddress {
                ip: Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]),
                port: u16::from_be_bytes([port[0], port[1]]),
            }
        })
        .collect();

    Ok(peers)
}

/// The query of an announce to an HTTP tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl AnnounceRequest {
    /// A first announce for a torrent, nothing downloaded yet.
    pub fn new(meta: &TorrentMetadata, peer_id: PeerId) -> Self {
        Self {
            info_hash: meta.info_hash.clone(),
            peer_id,
            port: DEFAULT_PORT,
            uploaded: 0,
            downloaded: 0,
            left: meta.length.max(0) as u64,
        }
    }

    /// The URL of the announce, with the info hash and the peer id
    /// percent-encoded byte by byte.
    pub fn to_url(&self, announce: &[u8]) -> Result<String, Error> {
        let announce = std::str::from_utf8(announce)
            .map_err(|_| Error::SchemaError("`announce` is not a valid URL".into()))?;

        let separator = if announce.contains('?') { '&' } else { '?' };

        Ok(format!(
            "{announce}{separator}info_hash={}&peer_id={}&port={}\
             &uploaded={}&downloaded={}&left={}&compact=1",
            urlencoding::encode_binary(&self.info_hash.0),
            urlencoding::encode_binary(&self.peer_id.0),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        ))
    }
}

/// The decoded body of a tracker response.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnounceResponse {
    /// Seconds the tracker wants us to wait between announces.
    pub interval: Option<i64>,
    pub peers: Vec<PeerAddress>,
}

impl AnnounceResponse {
    pub fn from_bencode(value: &Value) -> Result<Self, Error> {
        if value.as_dict().is_none() {
            return Err(Error::SchemaError(
                "tracker response must be a dictionary".into(),
            ));
        }

        if let Some(reason) = value.get(b"failure reason") {
            let reason = reason
                .as_bytes()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            return Err(Error::SchemaError(format!("tracker failure: {reason}")));
        }

        let peers = value
            .get(b"peers")
            .ok_or_else(|| Error::SchemaError("missing `peers`".into()))?
            .as_bytes()
            .ok_or_else(|| Error::SchemaError("`peers` must be a compact byte string".into()))?;

        Ok(Self {
            interval: value.get(b"interval").and_then(Value::as_integer),
            peers: parse_compact_peer_list(peers)?,
        })
    }
}
