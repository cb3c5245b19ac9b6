//! A remote peer in the network that we download a piece from.
mod piece;
mod request_manager;
pub mod session;
mod types;

// re-exports
pub use piece::PieceBuffer;
pub use session::Session;
pub use types::*;

use std::{io, net::SocketAddr};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
    time::{sleep_until, timeout, Instant},
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::Error,
    metainfo::{InfoHash, TorrentMetadata},
    tcp_wire::{Core, CoreCodec, Handshake, HandshakeCodec},
};

/// Downloads one piece of a torrent from one peer.
///
/// The connection is owned by the call to [`Peer::download`] or
/// [`Peer::run`], dropping the future closes it and discards the blocks
/// received so far.
#[derive(Debug)]
pub struct Peer {
    /// Address of the peer, only used for logging.
    remote: String,
    info_hash: InfoHash,
    local_peer_id: PeerId,
    config: Config,
    session: Session,
}

impl Peer {
    pub fn new(
        meta: &TorrentMetadata,
        index: usize,
        local_peer_id: PeerId,
        config: Config,
    ) -> Result<Self, Error> {
        config.validate()?;

        let piece_len = meta.piece_len(index)?;
        let hash = meta.piece_hash(index)?;
        let index = u32::try_from(index)
            .map_err(|_| Error::SchemaError(format!("piece {index} is out of range")))?;

        Ok(Self {
            remote: String::from("peer"),
            info_hash: meta.info_hash.clone(),
            local_peer_id,
            session: Session::new(index, piece_len, hash, &config),
            config,
        })
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Connect to the peer at `addr` and download the piece, see
    /// [`Self::run`].
    pub async fn download<W>(
        &mut self,
        addr: impl Into<SocketAddr>,
        sink: &mut W,
    ) -> Result<Vec<u8>, Error>
    where
        W: AsyncWrite + Unpin,
    {
        let addr = addr.into();
        self.remote = addr.to_string();

        debug!("{addr} connecting");

        let connect = TcpStream::connect(addr);

        let socket = match timeout(self.config.connect_timeout(), connect).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => return Err(self.session.fail(e.into())),
            Err(_) => {
                let e = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("could not connect to {addr}"),
                );
                return Err(self.session.fail(e.into()));
            }
        };

        self.run(socket, sink).await
    }

    /// Handshake over `io`, download the piece and verify it. The verified
    /// bytes are written to `sink` and returned, nothing is written when the
    /// download fails.
    ///
    /// On error the session is left in [`SessionState::Failed`].
    pub async fn run<T, W>(&mut self, io: T, sink: &mut W) -> Result<Vec<u8>, Error>
    where
        T: AsyncRead + AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        let r = self.run_inner(io, sink).await;
        r.map_err(|e| self.session.fail(e))
    }

    #[tracing::instrument(
        skip_all,
        fields(remote = %self.remote, piece = self.session.index())
    )]
    async fn run_inner<T, W>(&mut self, io: T, sink: &mut W) -> Result<Vec<u8>, Error>
    where
        T: AsyncRead + AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        let remote = self.remote.clone();
        let mut socket = self.handshake(io).await?;

        loop {
            let deadline = self.session.next_deadline();

            let msgs = select! {
                msg = socket.next() => {
                    let Some(msg) = msg else {
                        warn!("{remote} closed the connection");
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "the peer closed the connection",
                        )
                        .into());
                    };
                    self.session.handle_message(msg?, Instant::now())?
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.session.check_timeouts(Instant::now())?
                }
            };

            if !msgs.is_empty() {
                debug!("{remote} sending {} messages", msgs.len());
                for msg in msgs {
                    socket.feed(msg).await?;
                }
                socket.flush().await?;
            }

            if self.session.state() == SessionState::Verifying {
                let piece = self.session.verify()?;

                sink.write_all(&piece).await?;
                sink.flush().await?;
                self.session.delivered();

                info!(
                    "{remote} downloaded and verified piece {} ({} bytes)",
                    self.session.index(),
                    piece.len()
                );

                return Ok(piece);
            }
        }
    }

    /// Exchange handshakes and switch the connection to the codec of the
    /// core messages, keeping any byte already buffered.
    async fn handshake<T>(&mut self, io: T) -> Result<Framed<T, CoreCodec>, Error>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let remote = self.remote.clone();
        let mut socket = Framed::new(io, HandshakeCodec);

        let our_handshake = Handshake::new(self.info_hash.clone(), self.local_peer_id.clone());

        debug!("{remote} sending handshake");
        socket.send(our_handshake.clone()).await?;
        self.session.handshake_sent();

        let their_handshake = match timeout(self.config.handshake_timeout(), socket.next()).await {
            Ok(Some(handshake)) => handshake?,
            Ok(None) => {
                warn!("{remote} did not send a handshake");
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "the peer closed the connection during the handshake",
                )
                .into());
            }
            Err(_) => {
                warn!("{remote} handshake timed out");
                return Err(Error::PeerUnresponsive);
            }
        };

        debug!("{remote} received their handshake");

        let msgs = self.session.on_handshake(&our_handshake, &their_handshake, Instant::now())?;

        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new::<Core>(old_parts.io, CoreCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let mut socket = Framed::from_parts(new_parts);

        for msg in msgs {
            debug!("{remote} sending {msg:?}");
            socket.send(msg).await?;
        }

        Ok(socket)
    }
}
