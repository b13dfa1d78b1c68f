//! RESP2 wire protocol
//!
//! [`RespCodec`] frames a byte stream into [`Frame`]s and back, for use with
//! `tokio_util::codec::Framed`. Participants, the harness's node handles and
//! its intercepting links all speak this codec, which is what lets a link
//! stand in for a real peer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use cordon_core::{Command, Frame, ProtocolError};

/// Largest bulk string accepted (matches the usual server limit)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted
pub const MAX_DEPTH: usize = 32;

const CRLF: &[u8] = b"\r\n";

/// Codec for RESP2 frames
#[derive(Debug, Clone, Copy, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match parse_frame(&src[..], 0, 0)? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_frame(&item, dst);
        Ok(())
    }
}

impl<'a> Encoder<&'a Command> for RespCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a Command, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_frame(&item.to_frame(), dst);
        Ok(())
    }
}

/// Serialize a frame into `dst`
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::Simple(s) => {
            dst.put_u8(b'+');
            dst.put_slice(s.as_bytes());
            dst.put_slice(CRLF);
        }
        Frame::Error(s) => {
            dst.put_u8(b'-');
            dst.put_slice(s.as_bytes());
            dst.put_slice(CRLF);
        }
        Frame::Integer(i) => {
            dst.put_u8(b':');
            dst.put_slice(i.to_string().as_bytes());
            dst.put_slice(CRLF);
        }
        Frame::Bulk(data) => {
            dst.put_u8(b'$');
            dst.put_slice(data.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            dst.put_slice(data);
            dst.put_slice(CRLF);
        }
        Frame::Null => dst.put_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            dst.put_u8(b'*');
            dst.put_slice(items.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            for item in items {
                encode_frame(item, dst);
            }
        }
    }
}

/// Serialize a frame into a fresh buffer
pub fn frame_to_bytes(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf);
    buf.freeze()
}

/// Parse one frame starting at `pos`
///
/// Returns the frame and the offset just past it, or `None` when `buf`
/// does not yet hold a complete frame. `depth` counts enclosing arrays.
fn parse_frame(
    buf: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let Some(&kind) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match kind {
        b'+' => Ok(Some((Frame::Simple(text(line)), next))),
        b'-' => Ok(Some((Frame::Error(text(line)), next))),
        b':' => Ok(Some((Frame::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Frame::Null, next)));
            }
            let len = checked_len(len)?;
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::FrameTooLarge {
                    size: len,
                    max: MAX_BULK_LEN,
                });
            }
            let end = next + len;
            if buf.len() < end + CRLF.len() {
                return Ok(None);
            }
            if &buf[end..end + CRLF.len()] != CRLF {
                return Err(ProtocolError::MissingTerminator);
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((Frame::Bulk(data), end + CRLF.len())))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some((Frame::Null, next)));
            }
            let len = checked_len(len)?;
            if depth >= MAX_DEPTH {
                return Err(ProtocolError::TooDeep { max: MAX_DEPTH });
            }
            let mut items = Vec::with_capacity(len.min(1024));
            let mut cursor = next;
            for _ in 0..len {
                match parse_frame(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Frame::Array(items), cursor)))
        }
        other => Err(ProtocolError::InvalidTypeByte(other)),
    }
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let idx = rest.windows(CRLF.len()).position(|w| w == CRLF)?;
    Some((&rest[..idx], start + idx + CRLF.len()))
}

fn text(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger(text(line)))
}

fn checked_len(len: i64) -> Result<usize, ProtocolError> {
    usize::try_from(len).map_err(|_| ProtocolError::InvalidLength(len))
}
