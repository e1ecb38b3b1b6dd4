//! interactive client: connect to any `ws://` endpoint, send lines typed
//! on stdin, print whatever comes back. A thin smoke test for the frame
//! codec and client handshake, not part of the library's public surface.

use std::io::Write;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;
use ws_mock_core::codec::FrameIo;
use ws_mock_core::frame::OpCode;
use ws_mock_core::handshake::{client_handshake, ClientHandshakeOutcome};
use ws_mock_core::request::RawHeaders;

#[derive(Parser)]
struct Args {
    /// ws:// url to connect to
    uri: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::fmt()
        .with_max_level(Level::INFO)
        .finish()
        .try_init()
        .expect("failed to init log");

    let args = Args::parse();
    let url = Url::parse(&args.uri)?;
    let host = url.host_str().ok_or("uri has no host")?;
    let port = url.port().unwrap_or(80);

    let mut stream = TcpStream::connect((host, port)).await?;
    let outcome = client_handshake(&mut stream, &url, &RawHeaders::default()).await?;
    let head = match outcome {
        ClientHandshakeOutcome::Open(head) => head,
        ClientHandshakeOutcome::Rejected { status, reason, .. } => {
            return Err(format!("handshake rejected: {status} {reason}").into());
        }
    };
    let mut io = FrameIo::new_with(stream, Default::default(), head);

    let mut input = String::new();
    loop {
        print!("[SEND] > ");
        std::io::stdout().flush()?;
        input.clear();
        std::io::stdin().read_line(&mut input)?;
        let line = input.trim_end();
        if line == "quit" {
            break;
        }
        io.send_text(line).await?;
        match io.receive().await {
            Ok(frame) if frame.opcode() == OpCode::Text => {
                println!("[RECV] > {}", String::from_utf8_lossy(frame.payload()));
            }
            Ok(frame) if frame.opcode() == OpCode::Close => {
                println!("server closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                eprintln!("receive failed: {e}");
                break;
            }
        }
    }
    io.shutdown().await.ok();
    Ok(())
}
