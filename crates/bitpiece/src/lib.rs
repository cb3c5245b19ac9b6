//! Building blocks of a BitTorrent V1 client.
//!
//! This crate covers the two parts of a client that need exact protocol
//! correctness:
//!
//! * [`bencode`], the codec of `.torrent` files and tracker responses, and
//!   [`metainfo`] which reads the metadata and the info-hash of a torrent.
//! * [`peer`], which downloads a single piece from a single peer over the
//!   [`tcp_wire`] protocol and verifies it against its SHA-1 hash.
//!
//! Reading the `.torrent` file, talking HTTP with the tracker and choosing
//! which piece to download from which peer are left to the caller.
//!
//! # Example
//!
//! ```no_run
//! use bitpiece::{
//!     bencode::decode_exact,
//!     config::Config,
//!     metainfo::TorrentMetadata,
//!     peer::{Peer, PeerId},
//!     tracker::{AnnounceRequest, AnnounceResponse},
//! };
//!
//! # async fn run(
//! #     torrent: &[u8],
//! #     tracker_body: &[u8],
//! # ) -> Result<(), bitpiece::error::Error> {
//! let meta = TorrentMetadata::from_bytes(torrent)?;
//! let peer_id = PeerId::generate();
//!
//! // GET this url with any HTTP client, and decode the body
//! let url = AnnounceRequest::new(&meta, peer_id.clone())
//!     .to_url(&meta.announce)?;
//! # let _ = url;
//! let response = AnnounceResponse::from_bencode(&decode_exact(tracker_body)?)?;
//!
//! let mut piece = Vec::new();
//! let mut peer = Peer::new(&meta, 0, peer_id, Config::load().await?)?;
//! peer.download(response.peers[0], &mut piece).await?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod bitfield;
pub mod config;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod tcp_wire;
pub mod tracker;
