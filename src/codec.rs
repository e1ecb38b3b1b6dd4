//! frame-level read/write over an async duplex stream
//!
//! this is the layer the Frame Pipe (`pipe.rs`), Upgrade Acceptor
//! (`acceptor.rs`) and Upstream Connector (`upstream.rs`) all build on: a
//! `FrameIo<S>` turns a raw `AsyncRead + AsyncWrite` byte stream into a
//! source/sink of whole websocket frames, masking outbound frames and
//! unmasking + reassembling inbound ones.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{ProtocolError, WsError};
use crate::frame::{apply_mask, is_valid_close_code, parse_opcode, Header, OpCode, OwnedFrame, ReadFrame};

/// frame-level behavior knobs
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// mask frames this side writes (clients must mask, servers must not)
    pub mask_send_frame: bool,
    /// reject any single frame whose payload exceeds this many bytes
    pub max_frame_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            mask_send_frame: true,
            max_frame_payload_size: 64 << 20,
        }
    }
}

/// reads and writes whole websocket frames over an underlying async stream
///
/// `read_buf` may be pre-seeded with bytes the caller already read off the
/// wire (the "head buffer" of the upgrade acceptor contract) so they are
/// consumed as the first bytes of the post-handshake stream instead of
/// being dropped.
pub struct FrameIo<S> {
    stream: S,
    config: FrameConfig,
    read_buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameIo<S> {
    /// wrap a stream with default config and no pre-read bytes
    pub fn new(stream: S) -> Self {
        Self::new_with(stream, FrameConfig::default(), BytesMut::new())
    }

    /// wrap a stream, seeding the read buffer with bytes already consumed
    /// from the wire by the caller
    pub fn new_with(stream: S, config: FrameConfig, read_buf: BytesMut) -> Self {
        Self {
            stream,
            config,
            read_buf,
        }
    }

    /// borrow the underlying stream
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// consume this reader, returning the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn fill(&mut self, want: usize) -> Result<(), WsError> {
        while self.read_buf.len() < want {
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(WsError::IOError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed before frame completed",
                )));
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    async fn read_one(&mut self) -> Result<(bool, OpCode, Bytes), WsError> {
        self.fill(2).await?;
        let fin = self.read_buf[0] & 0x80 != 0;
        let rsv = self.read_buf[0] & 0x70;
        if rsv != 0 {
            return Err(WsError::ProtocolError {
                close_code: 1002,
                error: ProtocolError::InvalidLeadingBits(self.read_buf[0]),
            });
        }
        let opcode = parse_opcode(self.read_buf[0] & 0x0f).map_err(|code| WsError::ProtocolError {
            close_code: 1002,
            error: ProtocolError::InvalidOpcode(code),
        })?;
        let masked = self.read_buf[1] & 0x80 != 0;
        let len_byte = self.read_buf[1] & 0x7f;
        let (len_field_size, declared_len) = match len_byte {
            0..=125 => (0usize, len_byte as u64),
            126 => {
                self.fill(4).await?;
                (2, u16::from_be_bytes([self.read_buf[2], self.read_buf[3]]) as u64)
            }
            _ => {
                self.fill(10).await?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&self.read_buf[2..10]);
                (8, u64::from_be_bytes(arr))
            }
        };
        if opcode.is_control() && (declared_len > 125 || !fin) {
            return Err(WsError::ProtocolError {
                close_code: 1002,
                error: ProtocolError::FragmentedControlFrame,
            });
        }
        if declared_len as usize > self.config.max_frame_payload_size {
            return Err(WsError::ProtocolError {
                close_code: 1009,
                error: ProtocolError::PayloadTooLarge(self.config.max_frame_payload_size),
            });
        }
        let header_len = 2 + len_field_size + if masked { 4 } else { 0 };
        let total = header_len + declared_len as usize;
        self.fill(total).await?;
        let mask_key = if masked {
            let start = 2 + len_field_size;
            let mut arr = [0u8; 4];
            arr.copy_from_slice(&self.read_buf[start..start + 4]);
            Some(arr)
        } else {
            None
        };
        let mut payload = BytesMut::from(&self.read_buf[header_len..total]);
        if let Some(mask) = mask_key {
            apply_mask(&mut payload, mask);
        }
        let remaining = self.read_buf.split_off(total);
        self.read_buf = remaining;
        Ok((fin, opcode, payload.freeze()))
    }

    /// read one logical message, transparently reassembling continuation
    /// frames into a single `ReadFrame`
    pub async fn receive(&mut self) -> Result<ReadFrame, WsError> {
        let (fin, opcode, payload) = self.read_one().await?;
        let (opcode, payload) = if fin {
            (opcode, payload)
        } else {
            if opcode.is_control() {
                return Err(WsError::ProtocolError {
                    close_code: 1002,
                    error: ProtocolError::FragmentedControlFrame,
                });
            }
            let mut buf = BytesMut::new();
            buf.extend_from_slice(&payload);
            loop {
                let (cont_fin, cont_opcode, cont_payload) = self.read_one().await?;
                if cont_opcode != OpCode::Continue {
                    return Err(WsError::ProtocolError {
                        close_code: 1002,
                        error: ProtocolError::NotContinueFrameAfterFragmented,
                    });
                }
                buf.extend_from_slice(&cont_payload);
                if cont_fin {
                    break;
                }
            }
            (opcode, buf.freeze())
        };

        let (payload, close_code) = if opcode == OpCode::Close {
            if payload.is_empty() {
                (payload, None)
            } else if payload.len() >= 2 {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !is_valid_close_code(code) {
                    // a peer sending a close frame with an out-of-range status
                    // code is a protocol violation, not an ordinary close; the
                    // Frame Pipe propagates this same code to the other side
                    // before tearing it down (see pipe.rs)
                    return Err(WsError::ProtocolError {
                        close_code: 1002,
                        error: ProtocolError::InvalidCloseCode(code),
                    });
                }
                (payload.slice(2..), Some(code))
            } else {
                return Err(WsError::ProtocolError {
                    close_code: 1002,
                    error: ProtocolError::InvalidCloseFramePayload,
                });
            }
        } else {
            (payload, None)
        };

        Ok(ReadFrame {
            opcode,
            fin: true,
            payload,
            close_code,
        })
    }

    /// write a single, unfragmented frame
    pub async fn send(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), WsError> {
        let mask = self.config.mask_send_frame.then(rand::random::<[u8; 4]>);
        let frame = OwnedFrame::new(opcode, mask, payload);
        self.stream.write_all(&frame.to_bytes()).await?;
        Ok(())
    }

    /// write a text frame
    pub async fn send_text(&mut self, data: &str) -> Result<(), WsError> {
        self.send(OpCode::Text, data.as_bytes()).await
    }

    /// write a binary frame
    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), WsError> {
        self.send(OpCode::Binary, data).await
    }

    /// write a close frame; `code` of `None` produces a bare close with no
    /// status code or reason, which is what must be sent when an inbound
    /// close code fails RFC 6455 validity (spec 4.1)
    pub async fn send_close(&mut self, code: Option<u16>, reason: &str) -> Result<(), WsError> {
        let code = code.filter(|c| is_valid_close_code(*c));
        let reason = if code.is_some() { reason } else { "" };
        let mask = self.config.mask_send_frame.then(rand::random::<[u8; 4]>);
        let frame = OwnedFrame::close(mask, code, reason);
        self.stream.write_all(&frame.to_bytes()).await?;
        Ok(())
    }

    /// low-level "send raw control frame" primitive: write a close frame
    /// carrying exactly the given status code, bypassing the validity
    /// filter in `send_close`. Used to faithfully mirror a peer's own
    /// (possibly invalid) close code onto the other side of a pipe,
    /// replacing the ad-hoc internal-state mutation the original
    /// implementation relied on (see Design Notes "ad-hoc mutation").
    pub async fn send_raw_close(&mut self, code: u16) -> Result<(), WsError> {
        let mask = self.config.mask_send_frame.then(rand::random::<[u8; 4]>);
        let mut payload = BytesMut::with_capacity(2);
        payload.extend_from_slice(&code.to_be_bytes());
        let header = Header::new(true, OpCode::Close, mask, payload.len() as u64);
        let mut masked = payload.clone();
        if let Some(mask) = mask {
            apply_mask(&mut masked, mask);
        }
        let mut buf = BytesMut::with_capacity(header.0.len() + masked.len());
        buf.extend_from_slice(&header.0);
        buf.extend_from_slice(&masked);
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    /// write a ping frame, payload must be <= 125 bytes
    pub async fn send_ping(&mut self, data: &[u8]) -> Result<(), WsError> {
        self.send(OpCode::Ping, data).await
    }

    /// write a pong frame, payload must be <= 125 bytes
    pub async fn send_pong(&mut self, data: &[u8]) -> Result<(), WsError> {
        self.send(OpCode::Pong, data).await
    }

    /// flush any buffered writes
    pub async fn flush(&mut self) -> Result<(), WsError> {
        self.stream.flush().await?;
        Ok(())
    }

    /// shut down the underlying stream's write half
    pub async fn shutdown(&mut self) -> Result<(), WsError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_receive_text_roundtrip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_io = FrameIo::new_with(
            client,
            FrameConfig {
                mask_send_frame: true,
                ..Default::default()
            },
            BytesMut::new(),
        );
        let mut server_io = FrameIo::new_with(
            server,
            FrameConfig {
                mask_send_frame: false,
                ..Default::default()
            },
            BytesMut::new(),
        );
        client_io.send_text("hello").await.unwrap();
        let msg = server_io.receive().await.unwrap();
        assert_eq!(msg.opcode(), OpCode::Text);
        assert_eq!(msg.payload().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn binary_frame_preserves_discriminator() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_io = FrameIo::new(client);
        let mut server_io = FrameIo::new_with(
            server,
            FrameConfig {
                mask_send_frame: false,
                ..Default::default()
            },
            BytesMut::new(),
        );
        client_io.send_binary(&[1, 2, 3]).await.unwrap();
        let msg = server_io.receive().await.unwrap();
        assert_eq!(msg.opcode(), OpCode::Binary);
        assert_eq!(msg.payload().as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn close_frame_carries_code() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_io = FrameIo::new(client);
        let mut server_io = FrameIo::new_with(
            server,
            FrameConfig {
                mask_send_frame: false,
                ..Default::default()
            },
            BytesMut::new(),
        );
        client_io.send_close(Some(1000), "bye").await.unwrap();
        let msg = server_io.receive().await.unwrap();
        assert_eq!(msg.opcode(), OpCode::Close);
        assert_eq!(msg.close_code(), Some(1000));
        assert_eq!(msg.payload().as_ref(), b"bye");
    }

    #[tokio::test]
    async fn invalid_close_code_is_not_forwarded_by_send_close() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_io = FrameIo::new(client);
        let mut server_io = FrameIo::new_with(
            server,
            FrameConfig {
                mask_send_frame: false,
                ..Default::default()
            },
            BytesMut::new(),
        );
        client_io.send_close(Some(1005), "nope").await.unwrap();
        let msg = server_io.receive().await.unwrap();
        assert_eq!(msg.close_code(), None);
    }

    #[tokio::test]
    async fn close_frame_with_invalid_code_surfaces_as_protocol_error() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_io = FrameIo::new(client);
        let mut server_io = FrameIo::new_with(
            server,
            FrameConfig {
                mask_send_frame: false,
                ..Default::default()
            },
            BytesMut::new(),
        );
        client_io.send_raw_close(999).await.unwrap();
        let err = server_io.receive().await.unwrap_err();
        match err {
            WsError::ProtocolError {
                error: ProtocolError::InvalidCloseCode(code),
                ..
            } => assert_eq!(code, 999),
            other => panic!("expected InvalidCloseCode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_seeded_read_buf_is_consumed_first() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_io = FrameIo::new(client);
        client_io.send_text("hi").await.unwrap();
        let frame = {
            let mut buf = BytesMut::new();
            let mut head = [0u8; 8];
            let mut tmp_server = FrameIo::new(server);
            let n = tmp_server.stream.read(&mut head).await.unwrap();
            buf.extend_from_slice(&head[..n]);
            (tmp_server.into_inner(), buf)
        };
        let (server_stream, prefix) = frame;
        let mut server_io = FrameIo::new_with(server_stream, FrameConfig::default(), prefix);
        let msg = server_io.receive().await.unwrap();
        assert_eq!(msg.payload().as_ref(), b"hi");
    }
}
