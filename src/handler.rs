//! Handler Variants: the four WebSocket behavioral modes plus the shared
//! transport-level faults (spec.md §4.4)

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::acceptor::accept_upgrade;
use crate::connection::WsConnection;
use crate::errors::{SessionOutcome, WsError};
use crate::forwarding::ForwardingOptions;
use crate::frame::OpCode;
use crate::pipe::{self, PipeOutcome};
use crate::request::{HttpVersionHint, IncomingRequest, RawHeaders};
use crate::upstream::{resolve_upstream_target, UpstreamConnector, UpstreamDialOutcome};

/// a static, admin-configured rejection response (spec.md §4.4.4)
#[derive(Debug, Clone)]
pub struct RejectResponse {
    pub status_code: u16,
    pub status_message: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// `ws-passthrough` parameters: the dial target is always derived from
/// the inbound request (spec.md §4.2 "given a target `wsUrl`" — that
/// target is computed, not admin-configured); `forwarding` optionally
/// rewrites it before dialing (spec.md §3 "Forwarding options").
pub struct PassThroughOptions {
    pub forwarding: Option<ForwardingOptions>,
    pub connector: UpstreamConnector,
}

/// spec.md §3 "Handler variant tag", minus the serialization concerns of
/// `serialize.rs`
pub enum HandlerVariant {
    PassThrough(PassThroughOptions),
    Echo,
    Listen,
    Reject(RejectResponse),
    CloseConnection,
    ResetConnection,
    Timeout,
}

/// the internal close code the Pass-through handler uses when the
/// downstream side fails after the upgrade has completed (spec.md
/// §4.4.1 step 4)
const DOWNSTREAM_FAILURE_CLOSE_CODE: u16 = 1011;

/// dispatch one upgraded or to-be-upgraded request to its handler
pub async fn handle<S>(variant: &HandlerVariant, request: &IncomingRequest, socket: S, head: BytesMut) -> Result<SessionOutcome, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match variant {
        HandlerVariant::PassThrough(options) => pass_through(options, request, socket, head).await,
        HandlerVariant::Echo => echo(request, socket, head).await,
        HandlerVariant::Listen => listen(request, socket, head).await,
        HandlerVariant::Reject(response) => reject(socket, response).await,
        HandlerVariant::CloseConnection => {
            drop(socket);
            Ok(SessionOutcome::Destroyed)
        }
        HandlerVariant::ResetConnection => {
            // generic sockets have no portable RST; callers dialing real
            // TCP sockets should set SO_LINGER(0) themselves before the
            // socket reaches this dispatcher (see `reset::prepare_tcp`)
            drop(socket);
            Ok(SessionOutcome::Reset)
        }
        HandlerVariant::Timeout => {
            std::future::pending::<()>().await;
            unreachable!("timeout handler never resolves while its socket is alive")
        }
    }
}

/// spec.md §4.4.1 Pass-through
async fn pass_through<S>(options: &PassThroughOptions, request: &IncomingRequest, socket: S, head: BytesMut) -> Result<SessionOutcome, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let socket_encrypted = request.last_hop_encrypted.unwrap_or(false);
    let (target, headers) = resolve_upstream_target(request, options.forwarding.as_ref(), socket_encrypted)?;

    match options.connector.dial(&target, &headers, request.version).await? {
        UpstreamDialOutcome::Rejected { status, reason, headers, body } => {
            mirror_upstream_rejection(socket, status, &reason, &headers, &body).await?;
            Ok(SessionOutcome::Destroyed)
        }
        UpstreamDialOutcome::Open(upstream_io) => {
            let downstream_io = accept_upgrade(request, socket, head).await?;
            let mut downstream = WsConnection::new(downstream_io);
            let mut upstream = WsConnection::new(upstream_io);
            downstream.mark_open();
            upstream.mark_open();

            let outcome = pipe::run_with_internal_error_code(&mut downstream, &mut upstream, Some(DOWNSTREAM_FAILURE_CLOSE_CODE)).await;
            Ok(match outcome {
                PipeOutcome::ClosedCleanly => SessionOutcome::Completed,
                PipeOutcome::ErroredOut => SessionOutcome::Reset,
            })
        }
    }
}

/// spec.md §4.4.2 Echo: reflect every frame back to the sender verbatim,
/// preserving the binary/text discriminator and control-frame identity
async fn echo<S>(request: &IncomingRequest, socket: S, head: BytesMut) -> Result<SessionOutcome, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut io = accept_upgrade(request, socket, head).await?;
    loop {
        let frame = match io.receive().await {
            Ok(frame) => frame,
            Err(_) => return Ok(SessionOutcome::Reset),
        };
        let result = match frame.opcode() {
            OpCode::Text => {
                let text = std::str::from_utf8(frame.payload()).unwrap_or_default();
                io.send_text(text).await
            }
            OpCode::Binary => io.send_binary(frame.payload()).await,
            OpCode::Ping => io.send_ping(frame.payload()).await,
            OpCode::Pong => io.send_pong(frame.payload()).await,
            OpCode::Close => {
                let reason = std::str::from_utf8(frame.payload()).unwrap_or_default();
                let _ = io.send_close(frame.close_code(), reason).await;
                return Ok(SessionOutcome::Completed);
            }
            _ => Ok(()),
        };
        if result.is_err() {
            return Ok(SessionOutcome::Reset);
        }
    }
}

/// spec.md §4.4.3 Listen: complete the handshake, then drain and discard
/// every inbound frame without ever writing a response
async fn listen<S>(request: &IncomingRequest, socket: S, head: BytesMut) -> Result<SessionOutcome, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut io = accept_upgrade(request, socket, head).await?;
    loop {
        match io.receive().await {
            Ok(_frame) => continue,
            Err(_) => return Ok(SessionOutcome::Destroyed),
        }
    }
}

/// spec.md §4.4.4 Reject: write a raw HTTP response, no WebSocket
/// handshake is attempted
async fn reject<S>(mut socket: S, response: &RejectResponse) -> Result<SessionOutcome, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = format!("HTTP/1.1 {} {}\r\n", response.status_code, response.status_message);
    for (name, value) in &response.headers {
        buf.push_str(&format!("{name}: {value}\r\n"));
    }
    buf.push_str("\r\n");
    socket.write_all(buf.as_bytes()).await?;
    socket.write_all(&response.body).await?;
    socket.write_all(b"\r\n").await?;
    socket.shutdown().await?;
    Ok(SessionOutcome::Destroyed)
}

/// spec.md §4.2 step 8 / §7: an upstream HTTP rejection is mirrored
/// verbatim, byte for byte, to the downstream raw socket
async fn mirror_upstream_rejection<S>(
    mut socket: S,
    status: u16,
    reason: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        buf.push_str(&format!("{name}: {value}\r\n"));
    }
    buf.push_str("\r\n");
    socket.write_all(buf.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.shutdown().await?;
    Ok(())
}

/// set `SO_LINGER(0)` so closing `stream` emits RST instead of a clean FIN
/// (spec.md §4.4.5 "reset-connection: destroy with RST if the platform
/// exposes it")
pub mod reset {
    use std::time::Duration;
    use tokio::net::TcpStream;

    pub fn prepare_tcp(stream: &TcpStream) -> std::io::Result<()> {
        stream.set_linger(Some(Duration::from_secs(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RawHeaders;
    use tokio::io::AsyncReadExt;
    use url::Url;

    fn sample_request(key: &str) -> IncomingRequest {
        let mut headers = RawHeaders::default();
        headers.push("Sec-WebSocket-Key", key);
        IncomingRequest {
            method: "GET".into(),
            url: Url::parse("ws://client.local/chat").unwrap(),
            headers,
            version: HttpVersionHint::Http1,
            remote_ip_address: None,
            last_hop_encrypted: None,
        }
    }

    #[tokio::test]
    async fn reject_writes_exact_bytes_from_scenario_one() {
        let (mut client, server) = tokio::io::duplex(4096);
        let response = RejectResponse {
            status_code: 418,
            status_message: "I'm a teapot".into(),
            headers: vec![("X-Foo".into(), "bar".into())],
            body: b"nope".to_vec(),
        };
        let handle_task = tokio::spawn(async move { reject(server, &response).await });

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"HTTP/1.1 418 I'm a teapot\r\nX-Foo: bar\r\n\r\nnope\r\n");
        assert_eq!(handle_task.await.unwrap().unwrap(), SessionOutcome::Destroyed);
    }

    #[tokio::test]
    async fn echo_reflects_text_then_binary_preserving_discriminator() {
        let (mut client, server) = tokio::io::duplex(4096);
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let request = sample_request(key);
        tokio::spawn(async move {
            let _ = echo(&request, server, BytesMut::new()).await;
        });

        let mut handshake_buf = [0u8; 512];
        let _ = client.read(&mut handshake_buf).await.unwrap();

        let mut client_io = crate::codec::FrameIo::new(client);
        client_io.send_text("hello").await.unwrap();
        let echoed = client_io.receive().await.unwrap();
        assert_eq!(echoed.opcode(), OpCode::Text);
        assert_eq!(echoed.payload().as_ref(), b"hello");

        client_io.send_binary(&[1, 2, 3]).await.unwrap();
        let echoed = client_io.receive().await.unwrap();
        assert_eq!(echoed.opcode(), OpCode::Binary);
        assert_eq!(echoed.payload().as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn listen_never_writes_a_response() {
        let (client, server) = tokio::io::duplex(4096);
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let request = sample_request(key);
        tokio::spawn(async move {
            let _ = listen(&request, server, BytesMut::new()).await;
        });

        let mut client_io = crate::codec::FrameIo::new(client);
        for _ in 0..5 {
            client_io.send_text("spam").await.unwrap();
        }
        drop(client_io);
    }
}
