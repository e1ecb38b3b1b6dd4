//! Frame Pipe: bidirectional relay between two established endpoints
//! (spec.md §4.1)
//!
//! installed symmetrically; each direction forwards data frames only
//! while the peer is OPEN, translates close-code validity, and on a
//! transport error hard-destroys both sides, propagating an invalid
//! peer close code onto the far side first so it observes the identical
//! protocol violation (spec.md §7, §9 "ad-hoc mutation").

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::connection::WsConnection;
use crate::errors::{ProtocolError, WsError};
use crate::frame::{OpCode, ReadFrame};

/// outcome of running a pipe to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeOutcome {
    /// both sides exchanged a close frame and shut down cleanly
    ClosedCleanly,
    /// one side suffered a transport or protocol error
    ErroredOut,
}

/// relay frames between `a` and `b` until either side closes or errors
///
/// both connections must already be `Open` (spec.md §9: "Frame Pipes are
/// installed only on connecting → open"). Equivalent to
/// `run_with_internal_error_code(a, b, None)`.
pub async fn run<A, B>(a: &mut WsConnection<A>, b: &mut WsConnection<B>) -> PipeOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    run_with_internal_error_code(a, b, None).await
}

/// same as `run`, but on an ordinary (non protocol-violation) transport
/// error the surviving side is given one best-effort close frame
/// carrying `internal_error_code` before being hard-destroyed, instead of
/// the bare hard-destroy spec.md §4.1 describes generically
///
/// the Pass-through handler (spec.md §4.4.1 step 4: "on any error on
/// downstream socket after upgrade, close upstream with code 1011")
/// passes `Some(1011)` here; plain relays pass `None`.
pub async fn run_with_internal_error_code<A, B>(a: &mut WsConnection<A>, b: &mut WsConnection<B>, internal_error_code: Option<u16>) -> PipeOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    debug_assert!(a.is_open() && b.is_open());
    loop {
        tokio::select! {
            result = a.io_mut().receive() => {
                match result {
                    Ok(frame) => {
                        if frame.opcode() == OpCode::Close {
                            forward_close(&frame, a, b).await;
                            return PipeOutcome::ClosedCleanly;
                        }
                        forward_live_frame(&frame, a, b).await;
                    }
                    Err(err) => {
                        handle_transport_error(a, b, err, internal_error_code).await;
                        return PipeOutcome::ErroredOut;
                    }
                }
            }
            result = b.io_mut().receive() => {
                match result {
                    Ok(frame) => {
                        if frame.opcode() == OpCode::Close {
                            forward_close(&frame, b, a).await;
                            return PipeOutcome::ClosedCleanly;
                        }
                        forward_live_frame(&frame, b, a).await;
                    }
                    Err(err) => {
                        handle_transport_error(b, a, err, internal_error_code).await;
                        return PipeOutcome::ErroredOut;
                    }
                }
            }
        }
    }
}

/// forward a data or control (non-close) frame to `peer`, dropping it
/// silently if `peer` is not OPEN (spec.md §4.1). On a send failure the
/// spec's policy is to close the inbound `origin`, not the send target
/// (spec.md §4.1/§7: "the inbound socket is closed and the error is
/// logged").
async fn forward_live_frame<O, P>(frame: &ReadFrame, origin: &mut WsConnection<O>, peer: &mut WsConnection<P>)
where
    O: AsyncRead + AsyncWrite + Unpin,
    P: AsyncRead + AsyncWrite + Unpin,
{
    if !peer.is_open() {
        return;
    }
    let result = match frame.opcode() {
        OpCode::Text => {
            let text = std::str::from_utf8(frame.payload()).unwrap_or_default();
            peer.io_mut().send_text(text).await
        }
        OpCode::Binary => peer.io_mut().send_binary(frame.payload()).await,
        OpCode::Ping => peer.io_mut().send_ping(frame.payload()).await,
        OpCode::Pong => peer.io_mut().send_pong(frame.payload()).await,
        _ => Ok(()),
    };
    if let Err(err) = result {
        warn!(error = %err, "frame forward failed, closing inbound side");
        origin.hard_destroy().await;
    }
}

/// spec.md §4.1 bullet 3: forward a received close frame to `peer`,
/// falling back to a bare close if the forwarded write itself fails
async fn forward_close<O, P>(frame: &ReadFrame, origin: &mut WsConnection<O>, peer: &mut WsConnection<P>)
where
    O: AsyncRead + AsyncWrite + Unpin,
    P: AsyncRead + AsyncWrite + Unpin,
{
    origin.mark_closed();
    if !peer.is_open() {
        return;
    }
    let reason = std::str::from_utf8(frame.payload()).unwrap_or_default();
    let result = peer.io_mut().send_close(frame.close_code(), reason).await;
    if result.is_err() {
        let _ = peer.io_mut().send_close(None, "").await;
    }
    peer.mark_closed();
}

/// spec.md §4.1 bullet 4 / §7 "Peer protocol violation with invalid close
/// code": close `origin` outright; if the error was a peer-sent invalid
/// close code, synthesize that same code on `peer` before destroying it;
/// otherwise, destroy `peer` with no close frame, unless the caller asked
/// for a best-effort `internal_error_code` close on ordinary errors
/// (spec.md §4.4.1 step 4).
async fn handle_transport_error<O, P>(
    origin: &mut WsConnection<O>,
    peer: &mut WsConnection<P>,
    err: WsError,
    internal_error_code: Option<u16>,
) where
    O: AsyncRead + AsyncWrite + Unpin,
    P: AsyncRead + AsyncWrite + Unpin,
{
    debug!(error = %err, "transport error on pipe side, tearing down both ends");
    origin.hard_destroy().await;
    if let WsError::ProtocolError {
        error: ProtocolError::InvalidCloseCode(code),
        ..
    } = &err
    {
        if peer.is_open() {
            let _ = peer.io_mut().send_raw_close(*code).await;
        }
    } else if let Some(code) = internal_error_code {
        if peer.is_open() {
            let _ = peer.io_mut().send_close(Some(code), "Internal Error").await;
        }
    }
    peer.hard_destroy().await;
}
