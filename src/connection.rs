//! connection state machine (spec.md §9 "event-emitter-based flow")
//!
//! replaces the original's `'open'`/`'unexpected-response'`/`'error'`/
//! `'ws-upgrade'` events with an explicit state machine driven by the
//! caller instead of network callbacks. Frame Pipes (`pipe.rs`) are
//! installed only once both sides have reached `Open`, and consult a
//! peer's state before forwarding each frame.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::FrameIo;

/// lifecycle of one established (or establishing) WebSocket endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// handshake in flight, no frames may be sent or received yet
    Connecting,
    /// handshake completed; frames flow
    Open,
    /// the peer answered the handshake with a non-101 HTTP response
    Rejected,
    /// a transport or protocol error tore the connection down
    Errored,
    /// the raw socket has been destroyed
    Closed,
}

impl ConnectionState {
    /// true once frames may be forwarded to this endpoint (spec.md §4.1:
    /// "forwarding is attempted only if B is in the OPEN state")
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// a framed stream paired with its lifecycle state
///
/// grounded in the teacher's connection handle (`src/lib.rs`'s
/// `WebSocket` wrapper around a split sink/stream pair), collapsed here
/// into a single state field since this crate drives both directions
/// explicitly rather than through channel handles.
pub struct WsConnection<S> {
    io: FrameIo<S>,
    state: ConnectionState,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WsConnection<S> {
    /// wrap a freshly dialed or accepted frame stream, starting `Connecting`
    pub fn new(io: FrameIo<S>) -> Self {
        Self {
            io,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// `connecting → open`, the only transition that permits installing a
    /// Frame Pipe (spec.md §9)
    pub fn mark_open(&mut self) {
        self.state = ConnectionState::Open;
    }

    pub fn mark_rejected(&mut self) {
        self.state = ConnectionState::Rejected;
    }

    pub fn mark_errored(&mut self) {
        self.state = ConnectionState::Errored;
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn io(&self) -> &FrameIo<S> {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut FrameIo<S> {
        &mut self.io
    }

    /// unwrap into the underlying framed stream, discarding state
    pub fn into_io(self) -> FrameIo<S> {
        self.io
    }

    /// destroy the underlying raw socket without a close frame (spec.md
    /// §4.1 "hard-destroy the underlying raw socket of B")
    pub async fn hard_destroy(&mut self) {
        self.state = ConnectionState::Closed;
        let _ = self.io.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[tokio::test]
    async fn starts_connecting_and_moves_to_open() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = WsConnection::new(FrameIo::new_with(client, Default::default(), BytesMut::new()));
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_open());
        conn.mark_open();
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn hard_destroy_transitions_to_closed() {
        let (client, _server) = tokio::io::duplex(64);
        let mut conn = WsConnection::new(FrameIo::new_with(client, Default::default(), BytesMut::new()));
        conn.mark_open();
        conn.hard_destroy().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn only_open_state_permits_forwarding() {
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert!(!ConnectionState::Rejected.is_open());
        assert!(!ConnectionState::Errored.is_open());
        assert!(!ConnectionState::Closed.is_open());
    }
}
