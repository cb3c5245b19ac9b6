//! The state machine of a session downloading one piece from one peer.
//!
//! [`Session`] does no I/O, it is fed the handshake, the decoded messages and
//! the current time, and answers with the messages that must be sent back.
//! [`Peer`](super::Peer) drives it over a real connection.
use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    bitfield::{Bitfield, BitfieldExt},
    config::Config,
    error::Error,
    peer::{piece::PieceBuffer, request_manager::RequestManager, SessionState},
    tcp_wire::{Block, BlockInfo, Core, Handshake},
};

#[derive(Debug)]
pub struct Session {
    state: SessionState,

    /// The expected SHA-1 of the target piece.
    hash: [u8; 20],

    piece: PieceBuffer,

    /// Blocks that still have to be requested, in order.
    queue: VecDeque<BlockInfo>,

    /// Requests sent and not answered yet.
    requests: RequestManager,

    /// Blocks that were requested at least once.
    requested: Bitfield,

    /// Failing the session when this passes while we wait to be unchoked.
    idle_deadline: Option<Instant>,

    pipeline_len: usize,
    max_retries: u32,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl Session {
    pub fn new(index: u32, piece_len: u32, hash: [u8; 20], config: &Config) -> Self {
        let piece = PieceBuffer::new(index, piece_len, config.block_len);

        Self {
            state: SessionState::Connecting,
            hash,
            queue: piece.block_infos().collect(),
            requested: Bitfield::zeroed(piece.num_blocks()),
            piece,
            requests: RequestManager::new(),
            idle_deadline: None,
            pipeline_len: config.pipeline_len.max(1),
            max_retries: config.max_retries,
            request_timeout: config.request_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Index of the target piece.
    pub fn index(&self) -> u32 {
        self.piece.index()
    }

    /// Number of requests waiting for a block.
    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    /// Move to `Failed` with the kind of `err`, unless the session is
    /// already over. The error is given back for propagation.
    pub fn fail(&mut self, err: Error) -> Error {
        if !self.state.is_terminal() {
            debug!("piece {} session failed: {err}", self.index());
            self.state = SessionState::Failed(err.kind());
        }
        err
    }

    /// Our handshake was written to the peer.
    pub fn handshake_sent(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::HandshakePending;
        }
    }

    /// Validate the handshake of the peer against ours. On success the
    /// session is `Ready` and we tell the peer we are interested.
    pub fn on_handshake(
        &mut self,
        ours: &Handshake,
        theirs: &Handshake,
        now: Instant,
    ) -> Result<Vec<Core>, Error> {
        if self.state != SessionState::HandshakePending {
            return Err(self.fail(Error::ProtocolViolation(format!(
                "handshake received in state {:?}",
                self.state
            ))));
        }

        if let Err(e) = ours.validate(theirs) {
            return Err(self.fail(e));
        }

        debug!("handshake with peer {:?} is valid", theirs.peer_id);

        self.state = SessionState::Ready;
        self.idle_deadline = Some(now + self.idle_timeout);

        Ok(vec![Core::Interested])
    }

    /// Handle a message of the peer.
    pub fn handle_message(&mut self, msg: Core, now: Instant) -> Result<Vec<Core>, Error> {
        let r = self.on_message(msg, now);
        r.map_err(|e| self.fail(e))
    }

    fn on_message(&mut self, msg: Core, now: Instant) -> Result<Vec<Core>, Error> {
        match self.state {
            SessionState::Connecting | SessionState::HandshakePending => {
                return Err(Error::ProtocolViolation(format!(
                    "{msg:?} received before the handshake"
                )));
            }
            SessionState::Ready => {
                self.idle_deadline = Some(now + self.idle_timeout);
            }
            SessionState::Requesting => {}
            SessionState::Verifying
            | SessionState::Done
            | SessionState::Failed(_) => {
                debug!("ignoring {msg:?}, the session is {:?}", self.state);
                return Ok(Vec::new());
            }
        }

        match msg {
            Core::Unchoke if self.state == SessionState::Ready => {
                debug!("unchoked, requesting piece {}", self.index());
                self.state = SessionState::Requesting;
                self.idle_deadline = None;
                Ok(self.fill_pipeline(now))
            }
            Core::Choke if self.state == SessionState::Requesting => {
                let outstanding = self.requests.drain();
                debug!("choked with {} outstanding requests", outstanding.len());

                // they go back to the front, in order
                for block in outstanding.into_iter().rev() {
                    self.queue.push_front(block);
                }

                self.state = SessionState::Ready;
                self.idle_deadline = Some(now + self.idle_timeout);
                Ok(Vec::new())
            }
            Core::Piece(block) => self.on_block(block, now),
            msg => {
                debug!("ignoring {msg:?}");
                Ok(Vec::new())
            }
        }
    }

    fn on_block(&mut self, block: Block, now: Instant) -> Result<Vec<Core>, Error> {
        let info = BlockInfo::from(&block);

        let Some(slot) = self
            .piece
            .slot(block.begin)
            .filter(|_| block.index == self.index())
        else {
            return Err(Error::ProtocolViolation(format!(
                "received block {info:?} that is not part of piece {}",
                self.index()
            )));
        };

        if !self.requested.has(slot) {
            return Err(Error::ProtocolViolation(format!(
                "received block {info:?} that was never requested"
            )));
        }

        if !self.piece.add_block(&block)? {
            debug!("block {info:?} was already received");
            return Ok(Vec::new());
        }

        self.requests.remove_request(&info);
        // a block requested before a choke can still arrive
        self.queue.retain(|b| b.begin != block.begin);

        if self.piece.is_complete() {
            debug!("every block of piece {} was received", self.index());
            self.requests.drain();
            self.state = SessionState::Verifying;
            return Ok(Vec::new());
        }

        if self.state == SessionState::Requesting {
            return Ok(self.fill_pipeline(now));
        }

        Ok(Vec::new())
    }

    /// Request blocks until the window of outstanding requests is full or
    /// there is nothing left to request.
    fn fill_pipeline(&mut self, now: Instant) -> Vec<Core> {
        let mut msgs = Vec::new();

        while self.requests.len() < self.pipeline_len {
            let Some(block) = self.queue.pop_front() else { break };

            if let Some(slot) = self.piece.slot(block.begin) {
                self.requested.set(slot, true);
            }

            self.requests
                .add_request(block.clone(), now + self.request_timeout);
            msgs.push(Core::Request(block));
        }

        msgs
    }

    /// Request again the blocks whose deadline passed. Fails with
    /// `PeerUnresponsive` when a block exhausted its retries, or when the peer
    /// kept us choked and silent for too long.
    pub fn check_timeouts(&mut self, now: Instant) -> Result<Vec<Core>, Error> {
        let r = self.on_timeouts(now);
        r.map_err(|e| self.fail(e))
    }

    fn on_timeouts(&mut self, now: Instant) -> Result<Vec<Core>, Error> {
        match self.state {
            SessionState::Ready => {
                if self.idle_deadline.is_some_and(|d| d <= now) {
                    warn!("peer did not unchoke us in {:?}", self.idle_timeout);
                    return Err(Error::PeerUnresponsive);
                }
                Ok(Vec::new())
            }
            SessionState::Requesting => {
                let timed_out = self.requests.get_timeout_blocks_and_update(
                    now,
                    now + self.request_timeout,
                );

                let mut msgs = Vec::with_capacity(timed_out.len());

                for (block, timeouts) in timed_out {
                    if timeouts > self.max_retries {
                        warn!("block {block:?} timed out {timeouts} times, giving up");
                        return Err(Error::PeerUnresponsive);
                    }
                    debug!("re-requesting timed out block {block:?}");
                    msgs.push(Core::Request(block));
                }

                Ok(msgs)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// When the next call to [`Self::check_timeouts`] can have an effect.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        match self.state {
            SessionState::Ready => self.idle_deadline,
            SessionState::Requesting => self.requests.next_deadline(),
            _ => None,
        }
    }

    /// Hash the assembled piece. On a match the bytes are handed out and the
    /// session stays `Verifying` until [`Self::delivered`], otherwise they are
    /// discarded.
    pub fn verify(&mut self) -> Result<Vec<u8>, Error> {
        if self.state != SessionState::Verifying {
            return Err(self.fail(Error::ProtocolViolation(format!(
                "piece {} is not complete",
                self.index()
            ))));
        }

        if !self.piece.is_valid(&self.hash) {
            warn!("piece {} has an invalid hash", self.index());
            self.piece.take();
            return Err(self.fail(Error::HashMismatch));
        }

        Ok(self.piece.take())
    }

    /// The verified piece reached the caller.
    pub fn delivered(&mut self) {
        if self.state == SessionState::Verifying {
            self.state = SessionState::Done;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, tcp_wire::BLOCK_LEN};
    use sha1_smol::Sha1;

    fn sha1(data: &[u8]) -> [u8; 20] {
        let mut hash = Sha1::new();
        hash.update(data);
        hash.digest().bytes()
    }

    fn data(len: u32) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn block(data: &[u8], index: u32, begin: u32, len: u32) -> Core {
        let (b, l) = (begin as usize, len as usize);
        Core::Piece(Block {
            index,
            begin,
            block: data[b..b + l].to_vec(),
        })
    }

    fn requests(msgs: &[Core]) -> Vec<BlockInfo> {
        msgs.iter()
            .filter_map(|m| match m {
                Core::Request(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// A session that is unchoked and has sent its first requests.
    fn unchoked(data: &[u8], config: &Config, now: Instant) -> (Session, Vec<Core>) {
        let mut session = Session::new(0, data.len() as u32, sha1(data), config);
        let ours = Handshake::new([1u8; 20], [2u8; 20]);
        let theirs = Handshake::new([1u8; 20], [3u8; 20]);

        session.handshake_sent();
        assert_eq!(session.state(), SessionState::HandshakePending);

        let msgs = session.on_handshake(&ours, &theirs, now).unwrap();
        assert_eq!(msgs, vec![Core::Interested]);
        assert_eq!(session.state(), SessionState::Ready);

        let msgs = session.handle_message(Core::Unchoke, now).unwrap();
        assert_eq!(session.state(), SessionState::Requesting);

        (session, msgs)
    }

    #[test]
    fn handshake_mismatch() {
        let mut session = Session::new(0, 10, [0; 20], &Config::default());
        let ours = Handshake::new([1u8; 20], [2u8; 20]);
        let theirs = Handshake::new([9u8; 20], [3u8; 20]);

        session.handshake_sent();
        let err = session
            .on_handshake(&ours, &theirs, Instant::now())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::HandshakeMismatch);
        assert_eq!(
            session.state(),
            SessionState::Failed(ErrorKind::HandshakeMismatch)
        );
        assert_eq!(session.outstanding(), 0);
    }

    #[test]
    fn out_of_order_blocks() {
        let data = data(BLOCK_LEN * 2);
        let now = Instant::now();
        let (mut session, msgs) = unchoked(&data, &Config::default(), now);

        assert_eq!(
            requests(&msgs),
            vec![
                BlockInfo::new(0, 0, BLOCK_LEN),
                BlockInfo::new(0, BLOCK_LEN, BLOCK_LEN),
            ]
        );

        // second block first
        let msgs = session
            .handle_message(block(&data, 0, BLOCK_LEN, BLOCK_LEN), now)
            .unwrap();
        assert!(msgs.is_empty());
        assert_eq!(session.state(), SessionState::Requesting);

        session
            .handle_message(block(&data, 0, 0, BLOCK_LEN), now)
            .unwrap();
        assert_eq!(session.state(), SessionState::Verifying);

        assert_eq!(session.verify().unwrap(), data);
        assert_eq!(session.state(), SessionState::Verifying);

        session.delivered();
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn hash_mismatch() {
        let data = data(BLOCK_LEN + 100);
        let now = Instant::now();
        let (mut session, _) = unchoked(&data, &Config::default(), now);

        let mut corrupted = data.clone();
        corrupted[5] ^= 0xff;

        session
            .handle_message(block(&corrupted, 0, 0, BLOCK_LEN), now)
            .unwrap();
        session
            .handle_message(block(&corrupted, 0, BLOCK_LEN, 100), now)
            .unwrap();

        let err = session.verify().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HashMismatch);
        assert_eq!(
            session.state(),
            SessionState::Failed(ErrorKind::HashMismatch)
        );
    }

    #[test]
    fn pipelining() {
        let data = data(BLOCK_LEN * 12);
        let now = Instant::now();
        let (mut session, msgs) = unchoked(&data, &Config::default(), now);

        let mut in_flight = requests(&msgs);
        assert_eq!(in_flight.len(), 5);
        assert_eq!(session.outstanding(), 5);

        let mut received = 0;

        while !in_flight.is_empty() {
            let req = in_flight.remove(0);
            let msgs = session
                .handle_message(block(&data, 0, req.begin, req.len), now)
                .unwrap();
            received += 1;

            // one block in, at most one request out
            let new = requests(&msgs);
            assert!(new.len() <= 1);
            in_flight.extend(new);

            assert_eq!(session.outstanding(), in_flight.len());
            assert_eq!(in_flight.len(), (12 - received).min(5));
        }

        assert_eq!(received, 12);
        assert_eq!(session.state(), SessionState::Verifying);
        assert_eq!(session.verify().unwrap(), data);
    }

    #[test]
    fn timeouts_are_retried_then_fail() {
        let data = data(BLOCK_LEN);
        let config = Config::default();
        let mut now = Instant::now();
        let (mut session, msgs) = unchoked(&data, &config, now);
        assert_eq!(requests(&msgs).len(), 1);

        // not yet
        assert!(session.check_timeouts(now).unwrap().is_empty());
        assert_eq!(
            session.next_deadline(),
            Some(now + config.request_timeout())
        );

        for _ in 0..config.max_retries {
            now += config.request_timeout();
            let msgs = session.check_timeouts(now).unwrap();
            assert_eq!(requests(&msgs), vec![BlockInfo::new(0, 0, BLOCK_LEN)]);
        }

        now += config.request_timeout();
        let err = session.check_timeouts(now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PeerUnresponsive);
        assert_eq!(
            session.state(),
            SessionState::Failed(ErrorKind::PeerUnresponsive)
        );
    }

    #[test]
    fn choke_requeues_requests() {
        let data = data(BLOCK_LEN * 3);
        let config = Config {
            pipeline_len: 2,
            ..Default::default()
        };
        let now = Instant::now();
        let (mut session, msgs) = unchoked(&data, &config, now);
        assert_eq!(requests(&msgs).len(), 2);

        session.handle_message(Core::Choke, now).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.outstanding(), 0);
        assert_eq!(session.next_deadline(), Some(now + config.idle_timeout()));

        // a block requested before the choke still counts
        session
            .handle_message(block(&data, 0, BLOCK_LEN, BLOCK_LEN), now)
            .unwrap();

        let msgs = session.handle_message(Core::Unchoke, now).unwrap();
        assert_eq!(
            requests(&msgs),
            vec![
                BlockInfo::new(0, 0, BLOCK_LEN),
                BlockInfo::new(0, BLOCK_LEN * 2, BLOCK_LEN),
            ]
        );
    }

    #[test]
    fn idle_timeout_while_choked() {
        let data = data(10);
        let config = Config::default();
        let mut session = Session::new(0, 10, sha1(&data), &config);
        let now = Instant::now();
        let hs = Handshake::new([1u8; 20], [2u8; 20]);

        session.handshake_sent();
        session.on_handshake(&hs, &hs, now).unwrap();

        // messages keep the session alive
        let later = now + config.idle_timeout() / 2;
        session.handle_message(Core::KeepAlive, later).unwrap();
        assert!(session.check_timeouts(now + config.idle_timeout()).is_ok());

        let err = session
            .check_timeouts(later + config.idle_timeout())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PeerUnresponsive);
    }

    #[test]
    fn unexpected_blocks_are_violations() {
        let data = data(BLOCK_LEN * 8);
        let now = Instant::now();

        // never requested, the window only covers the first 5 blocks
        let (mut session, _) = unchoked(&data, &Config::default(), now);
        let err = session
            .handle_message(block(&data, 0, BLOCK_LEN * 7, BLOCK_LEN), now)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(
            session.state(),
            SessionState::Failed(ErrorKind::ProtocolViolation)
        );

        // another piece
        let (mut session, _) = unchoked(&data, &Config::default(), now);
        let err = session
            .handle_message(
                Core::Piece(Block {
                    index: 1,
                    begin: 0,
                    block: vec![0; 10],
                }),
                now,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        // wrong length
        let (mut session, _) = unchoked(&data, &Config::default(), now);
        let err = session
            .handle_message(block(&data, 0, 0, 10), now)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn other_messages_are_ignored() {
        let data = data(BLOCK_LEN);
        let now = Instant::now();
        let mut session = Session::new(0, BLOCK_LEN, sha1(&data), &Config::default());
        let hs = Handshake::new([1u8; 20], [2u8; 20]);

        session.handshake_sent();
        session.on_handshake(&hs, &hs, now).unwrap();

        for msg in [
            Core::Bitfield(Bitfield::from_vec(vec![0xff])),
            Core::Have(0),
            Core::KeepAlive,
            Core::Interested,
            Core::NotInterested,
            Core::Request(BlockInfo::default()),
            Core::Cancel(BlockInfo::default()),
            Core::Choke,
        ] {
            assert!(session.handle_message(msg, now).unwrap().is_empty());
            assert_eq!(session.state(), SessionState::Ready);
        }
    }

    #[test]
    fn messages_before_handshake() {
        let mut session = Session::new(0, 10, [0; 20], &Config::default());
        let err = session
            .handle_message(Core::Unchoke, Instant::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }
}
