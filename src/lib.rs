//! WebSocket interception core for an HTTP(S) mocking/intercepting proxy.
//!
//! An HTTP front-end (out of scope here) accepts a TCP connection,
//! terminates TLS, parses an HTTP Upgrade request, and hands
//! `(request, raw socket, head buffer)` to [`handler::handle`] once a
//! matching [`rule::Rule`] has been selected. From there this crate owns
//! the full WebSocket session: completing the downstream handshake
//! ([`acceptor`]), dialing an upstream endpoint when required
//! ([`upstream`]), and relaying frames ([`pipe`]) until either side
//! closes.

pub mod acceptor;
pub mod codec;
pub mod connection;
pub mod dns;
pub mod errors;
pub mod forwarding;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod pipe;
pub mod proxy;
pub mod request;
pub mod rule;
pub mod serialize;
pub mod stream;
pub mod tls;
pub mod upstream;

pub use connection::{ConnectionState, WsConnection};
pub use errors::{ProtocolError, SessionOutcome, WsError};
pub use frame::OpCode;
pub use handler::{HandlerVariant, PassThroughOptions, RejectResponse};
pub use request::{HttpVersionHint, IncomingRequest, RawHeaders};
pub use rule::{CompletionPredicate, ExchangeRecord, ExchangeSnapshot, Matcher, Rule};
pub use serialize::{HandlerConversionError, HandlerPayload};
pub use upstream::{ConnectorOptions, UpstreamConnector};
