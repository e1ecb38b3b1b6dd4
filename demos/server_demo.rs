//! minimal HTTP front-end: accepts raw TCP connections, parses the
//! upgrade request by hand (the role spec.md §6 leaves external to this
//! crate), and hands each one to a single echo `Rule`. Good enough to
//! point a websocket client at; not the front-end this crate ships.

use std::sync::Arc;

use bytes::BytesMut;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;
use ws_mock_core::handler::HandlerVariant;
use ws_mock_core::request::{HttpVersionHint, IncomingRequest, RawHeaders};
use ws_mock_core::rule::{Matcher, Rule};

#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    #[clap(short, long, default_value = "9000")]
    port: u16,
}

struct MatchAnything;
impl Matcher for MatchAnything {
    fn matches(&self, _request: &IncomingRequest) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::fmt()
        .with_max_level(Level::DEBUG)
        .finish()
        .try_init()
        .expect("failed to init log");

    let args = Args::parse();
    let rule = Arc::new(Rule::new("echo-everything", vec![Box::new(MatchAnything)], HandlerVariant::Echo, None));

    tracing::info!("binding on {}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    loop {
        let (stream, addr) = listener.accept().await?;
        let rule = rule.clone();
        tokio::spawn(async move {
            tracing::info!(?addr, "accepted connection");
            match parse_upgrade_request(stream).await {
                Ok((request, socket, head)) => {
                    if !rule.matches(&request) {
                        tracing::warn!("no matching rule for request, dropping");
                        return;
                    }
                    match rule.handle(&request, socket, head, false).await {
                        Ok(outcome) => tracing::info!(?outcome, "session ended"),
                        Err(e) => tracing::warn!(error = %e, "session failed"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to parse upgrade request"),
            }
        });
    }
}

/// read bytes off `stream` until a full HTTP header block is buffered,
/// parse the request line and headers, and split off anything read past
/// the header terminator as the `head` buffer the acceptor replays.
async fn parse_upgrade_request(mut stream: TcpStream) -> Result<(IncomingRequest, TcpStream, BytesMut), Box<dyn std::error::Error>> {
    let mut buf = BytesMut::with_capacity(1024);
    let header_end = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err("peer closed before request completed".into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break end + 4;
        }
    };

    let mut parsed_headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut parsed_headers);
    parsed.parse(&buf[..header_end])?;
    let method = parsed.method.unwrap_or("GET").to_string();
    let path = parsed.path.unwrap_or("/").to_string();

    let mut headers = RawHeaders::default();
    let mut host = None;
    for header in parsed.headers.iter() {
        let value = String::from_utf8_lossy(header.value).to_string();
        if header.name.eq_ignore_ascii_case("host") {
            host = Some(value.clone());
        }
        headers.push(header.name, value);
    }
    let host = host.ok_or("missing Host header")?;
    let url = Url::parse(&format!("ws://{host}{path}"))?;

    let request = IncomingRequest {
        method,
        url,
        headers,
        version: HttpVersionHint::Http1,
        remote_ip_address: stream.peer_addr().ok().map(|a| a.ip()),
        last_hop_encrypted: Some(false),
    };

    let remainder = BytesMut::from(&buf[header_end..]);
    Ok((request, stream, remainder))
}
