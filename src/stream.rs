//! plain/TLS stream enum and the "replay already-read bytes" adapter
//!
//! grounded in the teacher's `WsStream<S>` enum (`src/stream.rs`), ported to
//! the async, rustls-backed world this crate needs for dialing upstream
//! over `wss://`.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream as ClientTlsStream;

/// either a plain TCP-like stream or one wrapped in a TLS session
pub enum MaybeTlsStream<S> {
    /// unencrypted
    Plain(S),
    /// TLS-wrapped client connection (used when dialing `wss://` upstream)
    Tls(Box<ClientTlsStream<S>>),
}

impl<S> MaybeTlsStream<S> {
    /// true if this is the `Tls` variant
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// wraps a stream so bytes already read from it (e.g. by an HTTP front-end
/// that over-read past the request boundary) are served first, before
/// falling through to the underlying stream
///
/// grounded in the pack's proxy internals (`hudsucker`'s `Rewind`), which
/// solve the identical "the head buffer must be replayed" problem from
/// spec.md's Upgrade Acceptor contract.
pub struct Rewind<S> {
    prefix: BytesMut,
    inner: S,
}

impl<S> Rewind<S> {
    /// wrap `inner`, serving `prefix` before any of `inner`'s own bytes
    pub fn new(inner: S, prefix: BytesMut) -> Self {
        Self { prefix, inner }
    }

    /// unwrap, returning the inner stream and any still-unconsumed prefix
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.inner, self.prefix)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = std::cmp::min(buf.remaining(), this.prefix.len());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn rewind_serves_prefix_before_inner_bytes() {
        use tokio::io::AsyncWriteExt;
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"world").await.unwrap();
        let mut rewound = Rewind::new(reader, BytesMut::from(&b"hello "[..]));
        let mut out = [0u8; 11];
        rewound.read_exact(&mut out[..6]).await.unwrap();
        assert_eq!(&out[..6], b"hello ");
        rewound.read_exact(&mut out[6..]).await.unwrap();
        assert_eq!(&out, b"hello world");
    }
}
