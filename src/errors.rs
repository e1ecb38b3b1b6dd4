use thiserror::Error;

use crate::{connection::ConnectionState, frame::OpCode};

/// errors raised while dialing upstream, completing a handshake, or
/// moving frames between two established websockets
#[derive(Debug, Error)]
pub enum WsError {
    #[error("invalid uri `{0}`")]
    InvalidUri(String),
    #[error("unsupported proxy, expect socks5 or http, got {0}")]
    UnsupportedProxy(String),
    #[error("invalid proxy `{0}`")]
    InvalidProxy(String),
    #[error("cert {0} not found")]
    CertFileNotFound(String),
    #[error("load cert {0} failed: {1}")]
    LoadCertFailed(String, String),
    #[error("client certificate for {0} could not be decoded")]
    InvalidClientCert(String),
    #[error("connection failed `{0}`")]
    ConnectionFailed(String),
    #[error("dns lookup failed `{0}`")]
    DnsLookupFailed(String),
    #[error("tls handshake failed `{0}`")]
    TlsFailed(String),
    #[error("io error {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    HandShakeFailed(String),
    #[error("upstream rejected upgrade with status {status}")]
    UpstreamRejected {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    #[error("{error}")]
    ProtocolError {
        close_code: u16,
        error: ProtocolError,
    },
    #[error("proxy error `{0}`")]
    ProxyError(String),
    #[error("io on invalid connection state {0:?}")]
    InvalidConnState(ConnectionState),
    #[error("unsupported frame {0:?}")]
    UnsupportedFrame(OpCode),
}

/// errors raised while decoding a frame from bytes on the wire
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("insufficient data len {0}")]
    InsufficientLen(usize),
    #[error("invalid leading bits {0:b}")]
    InvalidLeadingBits(u8),
    #[error("invalid opcode {0}")]
    InvalidOpcode(u8),
    #[error("mismatch data len, expect {0}, got {1}")]
    MisMatchDataLen(usize, usize),
    #[error("missing init fragmented frame")]
    MissInitialFragmentedFrame,
    #[error("not continue frame after init fragmented frame")]
    NotContinueFrameAfterFragmented,
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    #[error("control frame is too big {0}")]
    ControlFrameTooBig(usize),
    #[error("invalid close frame payload len, expect 0, >= 2")]
    InvalidCloseFramePayload,
    #[error("invalid utf-8 text")]
    InvalidUtf8,
    #[error("invalid close code {0}")]
    InvalidCloseCode(u16),
    #[error("payload too large, max payload size {0}")]
    PayloadTooLarge(usize),
}

/// the observable result of a session once its socket is no longer live
///
/// replaces raw exceptions with an explicit outcome a dispatcher can log
/// without downcasting errors (see Design Notes, thrown-exception flow)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// both sides completed a clean close handshake
    Completed,
    /// the raw socket was destroyed without a response
    Destroyed,
    /// the raw socket was destroyed with RST (or closed, if unsupported)
    Reset,
    /// the socket was left open and nothing was ever written
    TimedOut,
}
