//! Upgrade Acceptor (spec.md §4.3)
//!
//! completes the server side of the RFC 6455 handshake on a raw socket that
//! the HTTP front-end has already accepted and parsed the request line and
//! headers for. The `head` buffer the front-end over-read must be replayed
//! as the first bytes of the post-handshake frame stream.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec::{FrameConfig, FrameIo};
use crate::errors::WsError;
use crate::handshake::accept_key;
use crate::request::IncomingRequest;

/// complete the downstream handshake, returning a `FrameIo` ready to send
/// and receive frames
///
/// emits a `tracing` event in place of the original's `ws-upgrade`/
/// `connection` events (Design Notes §9: event-emitter flow becomes a
/// state machine; there is no observer object here, callers that need to
/// know "a session just opened" can instrument this call).
pub async fn accept_upgrade<S>(request: &IncomingRequest, mut socket: S, head: BytesMut) -> Result<FrameIo<S>, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = request
        .headers
        .get("sec-websocket-key")
        .ok_or_else(|| WsError::HandShakeFailed("missing Sec-WebSocket-Key".into()))?;
    let accept = accept_key(key);

    let mut response = String::new();
    response.push_str("HTTP/1.1 101 Switching Protocols\r\n");
    response.push_str("Upgrade: websocket\r\n");
    response.push_str("Connection: Upgrade\r\n");
    response.push_str(&format!("Sec-WebSocket-Accept: {accept}\r\n"));
    response.push_str("\r\n");

    socket.write_all(response.as_bytes()).await?;
    tracing::debug!(method = %request.method, url = %request.url, "completed downstream websocket upgrade");

    let config = FrameConfig {
        mask_send_frame: false,
        ..Default::default()
    };
    Ok(FrameIo::new_with(socket, config, head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{HttpVersionHint, RawHeaders};
    use tokio::io::AsyncReadExt;
    use url::Url;

    fn sample_request(key: &str) -> IncomingRequest {
        let mut headers = RawHeaders::default();
        headers.push("Sec-WebSocket-Key", key);
        headers.push("Upgrade", "websocket");
        headers.push("Connection", "Upgrade");
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
    async fn writes_101_response_with_matching_accept_key() {
        let (client, server) = tokio::io::duplex(4096);
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let request = sample_request(key);
        let mut server = server;
        let handle = tokio::spawn(async move { accept_upgrade(&request, server, BytesMut::new()).await });

        let mut client = client;
        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        server = handle.await.unwrap().unwrap().into_inner();
        drop(server);
    }

    #[tokio::test]
    async fn head_buffer_is_replayed_as_first_frame_bytes() {
        use crate::frame::OpCode;

        let (client, server) = tokio::io::duplex(4096);
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let request = sample_request(key);

        // simulate the front-end having already read the first frame's
        // bytes while looking for the end of the HTTP headers
        let frame = crate::frame::OwnedFrame::text(None, "hi");
        let head = BytesMut::from(&frame.to_bytes()[..]);

        let handle = tokio::spawn(async move { accept_upgrade(&request, server, head).await });

        let mut client = client;
        let mut discard = [0u8; 1024];
        let _ = client.read(&mut discard).await.unwrap();

        let mut io = handle.await.unwrap().unwrap();
        let msg = io.receive().await.unwrap();
        assert_eq!(msg.opcode(), OpCode::Text);
        assert_eq!(msg.payload().as_ref(), b"hi");
    }
}
