use std::fmt::Display;

use rand::{distributions::Alphanumeric, Rng};
use speedy::{Readable, Writable};

use crate::error::ErrorKind;

/// Client prefix of the peer ids we generate, in the Azureus style.
const PEER_ID_PREFIX: &[u8; 8] = b"-BP0010-";

#[derive(Clone, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// A new id made of our client prefix and 12 random alphanumerics.
    pub fn generate() -> Self {
        let mut peer_id = [0; 20];
        peer_id[..8].copy_from_slice(PEER_ID_PREFIX);

        let mut rng = rand::thread_rng();
        (8..20).for_each(|i| {
            peer_id[i] = rng.sample(Alphanumeric);
        });

        PeerId(peer_id)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s)
    }
}

impl From<PeerId> for [u8; 20] {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

/// The lifecycle of a session downloading one piece from one peer.
///
/// `Failed` is absorbing and can be reached from every state that is not
/// `Done`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// The TCP connection is being established.
    #[default]
    Connecting,

    /// Our handshake was sent, waiting for theirs.
    HandshakePending,

    /// Handshaked and interested, waiting for the peer to unchoke us.
    Ready,

    /// Unchoked, blocks of the piece are being requested.
    Requesting,

    /// Every block arrived, the piece is being hashed.
    Verifying,

    /// The piece was verified and written to the sink of the caller.
    Done,

    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_peer_id() {
        let a = PeerId::generate();
        let b = PeerId::generate();

        assert_eq!(&a.0[..8], b"-BP0010-");
        assert!(a.0[8..].iter().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId([0xab; 20]).to_string(), "ab".repeat(20));
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Done.is_terminal());
        assert!(SessionState::Failed(ErrorKind::HashMismatch).is_terminal());
        assert!(!SessionState::Requesting.is_terminal());
        assert_eq!(SessionState::default(), SessionState::Connecting);
    }
}
