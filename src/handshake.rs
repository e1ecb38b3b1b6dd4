//! RFC 6455 key/accept-token math and the client-side handshake used to
//! dial an upstream websocket endpoint
//!
//! grounded in the teacher's `protocol.rs` (`gen_key`, `cal_accept_key`,
//! `perform_handshake`); the server-side half of the teacher's handshake
//! (`handle_handshake`) is not needed here because spec.md's ingress
//! boundary already hands over a *parsed* request — see `acceptor.rs`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::BytesMut;
use sha1::Digest;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::errors::WsError;
use crate::request::RawHeaders;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// generate a fresh, random `Sec-WebSocket-Key`
pub fn generate_key() -> String {
    let bytes: [u8; 16] = rand::random();
    BASE64.encode(bytes)
}

/// compute the `Sec-WebSocket-Accept` value for a given key
pub fn accept_key(key: &str) -> String {
    let mut hasher = sha1::Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// outcome of dialing the upstream handshake
pub enum ClientHandshakeOutcome {
    /// upstream answered 101 Switching Protocols; handshake complete, any
    /// bytes already read past the response belong to the frame stream
    Open(BytesMut),
    /// upstream answered with an ordinary HTTP response instead of 101;
    /// must be mirrored verbatim to the downstream socket (spec.md §4.2
    /// step 8, §7 "Upstream HTTP rejection")
    Rejected {
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

/// perform the client side of the RFC 6455 handshake against an already
/// connected (and, if applicable, already TLS-wrapped) stream
///
/// `headers` must already have `sec-websocket-*`/`connection`/`upgrade`
/// stripped (spec.md §4.2 step 6) — this function adds the ones it needs.
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    url: &Url,
    headers: &RawHeaders,
) -> Result<ClientHandshakeOutcome, WsError> {
    let key = generate_key();
    let host_header = match headers.get("host") {
        Some(h) => h.to_string(),
        None => {
            let host = url
                .host_str()
                .ok_or_else(|| WsError::InvalidUri(url.to_string()))?;
            match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
    };
    let path = if url.query().is_some() {
        format!("{}?{}", url.path(), url.query().unwrap())
    } else {
        url.path().to_string()
    };

    let mut request = format!("GET {path} HTTP/1.1\r\n");
    request.push_str(&format!("Host: {host_header}\r\n"));
    request.push_str("Upgrade: websocket\r\n");
    request.push_str("Connection: Upgrade\r\n");
    request.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
    request.push_str("Sec-WebSocket-Version: 13\r\n");
    for (name, value) in &headers.0 {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(WsError::HandShakeFailed(
                "upstream closed before handshake response completed".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if find_header_end(&buf).is_some() {
            break;
        }
    }
    let header_end = find_header_end(&buf).unwrap();
    let mut parsed_headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut parsed_headers);
    response
        .parse(&buf[..header_end])
        .map_err(|e| WsError::HandShakeFailed(format!("invalid upstream response: {e}")))?;
    let status = response.code.unwrap_or_default();
    let reason = response.reason.unwrap_or_default().to_string();
    let resp_headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).to_string()))
        .collect();

    let mut remainder = buf.split_off(header_end);
    let _ = remainder.split_to(std::cmp::min(4, remainder.len())); // drop the CRLFCRLF we already matched on

    if status != 101 {
        let content_length = resp_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok());
        let mut body = remainder.to_vec();
        if let Some(len) = content_length {
            while body.len() < len {
                let mut chunk = [0u8; 4096];
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(len);
        }
        return Ok(ClientHandshakeOutcome::Rejected {
            status,
            reason,
            headers: resp_headers,
            body,
        });
    }

    let expect = accept_key(&key);
    let got = resp_headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("sec-websocket-accept"))
        .map(|(_, v)| v.as_str());
    if got != Some(expect.as_str()) {
        return Err(WsError::HandShakeFailed(format!(
            "mismatched Sec-WebSocket-Accept, expected {expect}, got {got:?}"
        )));
    }

    Ok(ClientHandshakeOutcome::Open(remainder))
}

fn find_header_end(buf: &BytesMut) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
