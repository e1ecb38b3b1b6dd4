//! end-to-end Pass-through coverage (spec.md §4.4.1): dials a real loopback
//! TCP "upstream", completes both handshakes, and relays frames through the
//! full `Rule` -> `handler::handle` -> `UpstreamConnector` -> `pipe::run`
//! chain. The unit tests alongside each module cover their pieces in
//! isolation (`tests/` per SPEC_FULL.md §0's "Test tooling"); this is the
//! one path that genuinely needs two real sockets instead of a duplex pair,
//! since the Upstream Connector dials `tokio::net::TcpStream` directly.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use ws_mock_core::codec::{FrameConfig, FrameIo};
use ws_mock_core::frame::OpCode;
use ws_mock_core::handler::{HandlerVariant, PassThroughOptions};
use ws_mock_core::request::{HttpVersionHint, IncomingRequest, RawHeaders};
use ws_mock_core::rule::{Matcher, Rule};
use ws_mock_core::upstream::{ConnectorOptions, UpstreamConnector};
use ws_mock_core::SessionOutcome;

struct MatchAnything;
impl Matcher for MatchAnything {
    fn matches(&self, _request: &IncomingRequest) -> bool {
        true
    }
}

/// accept one handshake as a bare-bones origin server and hand back a
/// frame stream that does not mask its own outgoing frames (server role)
async fn accept_as_origin(mut stream: tokio::net::TcpStream) -> FrameIo<tokio::net::TcpStream> {
    let mut buf = BytesMut::with_capacity(1024);
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending handshake request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break end + 4;
        }
    };

    let mut parsed_headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut parsed_headers);
    request.parse(&buf[..header_end]).unwrap();
    let key = request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("sec-websocket-key"))
        .map(|h| String::from_utf8_lossy(h.value).to_string())
        .expect("upstream request carried no Sec-WebSocket-Key");

    let accept = ws_mock_core::handshake::accept_key(&key);
    let response = format!("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n");
    stream.write_all(response.as_bytes()).await.unwrap();

    let remainder = BytesMut::from(&buf[header_end..]);
    FrameIo::new_with(
        stream,
        FrameConfig {
            mask_send_frame: false,
            ..Default::default()
        },
        remainder,
    )
}

fn downstream_request(url: &str) -> IncomingRequest {
    let mut headers = RawHeaders::default();
    headers.push("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
    headers.push("Upgrade", "websocket");
    headers.push("Connection", "Upgrade");
    IncomingRequest {
        method: "GET".into(),
        url: Url::parse(url).unwrap(),
        headers,
        version: HttpVersionHint::Http1,
        remote_ip_address: None,
        last_hop_encrypted: Some(false),
    }
}

#[tokio::test]
async fn pass_through_relays_a_text_frame_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_port = listener.local_addr().unwrap().port();

    let origin = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut io = accept_as_origin(stream).await;
        let frame = io.receive().await.unwrap();
        assert_eq!(frame.opcode(), OpCode::Text);
        io.send_text(std::str::from_utf8(frame.payload()).unwrap()).await.unwrap();
        // observe the client's close forwarded through the pipe; the pipe
        // marks both sides closed on receipt, so nothing more is sent back
        let close = io.receive().await.unwrap();
        assert_eq!(close.opcode(), OpCode::Close);
    });

    let (mut test_client, server_socket) = tokio::io::duplex(8192);

    let request = downstream_request(&format!("ws://127.0.0.1:{upstream_port}/chat"));
    let rule = Arc::new(Rule::new(
        "passthrough",
        vec![Box::new(MatchAnything)],
        HandlerVariant::PassThrough(PassThroughOptions {
            forwarding: None,
            connector: UpstreamConnector::new(ConnectorOptions::default()),
        }),
        None,
    ));

    let dispatch = tokio::spawn(async move { rule.handle(&request, server_socket, BytesMut::new(), true).await });

    // consume the downstream 101 response
    let mut response_buf = [0u8; 512];
    let n = test_client.read(&mut response_buf).await.unwrap();
    assert!(String::from_utf8_lossy(&response_buf[..n]).starts_with("HTTP/1.1 101"));

    let mut client_io = FrameIo::new(test_client);
    client_io.send_text("hello upstream").await.unwrap();
    let echoed = client_io.receive().await.unwrap();
    assert_eq!(echoed.opcode(), OpCode::Text);
    assert_eq!(echoed.payload().as_ref(), b"hello upstream");

    // the pipe forwards this close to the upstream side (asserted inside
    // `origin` below) but, per spec.md §4.1, does not itself generate a
    // reply close frame back to the sender.
    client_io.send_close(Some(1000), "bye").await.unwrap();

    origin.await.unwrap();
    let outcome = dispatch.await.unwrap().unwrap();
    assert_eq!(outcome, SessionOutcome::Completed);
}

#[tokio::test]
async fn pass_through_mirrors_upstream_rejection_verbatim() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_port = listener.local_addr().unwrap().port();

    let origin = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found")
            .await
            .unwrap();
    });

    let (mut test_client, server_socket) = tokio::io::duplex(8192);
    let request = downstream_request(&format!("ws://127.0.0.1:{upstream_port}/missing"));
    let rule = Rule::new(
        "passthrough-rejected",
        vec![],
        HandlerVariant::PassThrough(PassThroughOptions {
            forwarding: None,
            connector: UpstreamConnector::new(ConnectorOptions::default()),
        }),
        None,
    );

    let dispatch = tokio::spawn(async move { rule.handle(&request, server_socket, BytesMut::new(), false).await });

    let mut buf = Vec::new();
    test_client.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found");

    origin.await.unwrap();
    assert_eq!(dispatch.await.unwrap().unwrap(), SessionOutcome::Destroyed);
}
