// src/core/protocol/resp_frame.rs

//! Implements the RESP2 (REdis Serialization Protocol) frame structure and the corresponding
//! `Encoder`/`Decoder` used to talk to monitored instances and to serve the admin query
//! surface. The monitor only ever needs RESP2: PING/INFO/SUBSCRIBE/PUBLISH/SLAVEOF/AUTH and
//! the SENTINEL admin commands are all plain request/reply or pub/sub traffic.

use crate::core::WardenError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits on the frame decoder, to bound memory use
// against a malformed or hostile peer.
const MAX_FRAME_ELEMENTS: usize = 1024 * 1024;
const MAX_BULK_STRING_SIZE: usize = 64 * 1024 * 1024;

/// A single frame in the RESP2 protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Encodes this frame into a freshly allocated byte vector.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, WardenError> {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = WardenError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = WardenError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_frame(src) {
            Ok((frame, len)) => {
                src.advance(len);
                Ok(Some(frame))
            }
            Err(WardenError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Inspects the leading type-prefix byte and dispatches to the matching parser.
fn parse_frame(src: &[u8]) -> Result<(RespFrame, usize), WardenError> {
    if src.is_empty() {
        return Err(WardenError::IncompleteData);
    }
    match src[0] {
        b'+' => parse_simple_string(src),
        b'-' => parse_error(src),
        b':' => parse_integer(src),
        b'$' => parse_bulk_string(src),
        b'*' => parse_array(src),
        _ => Err(WardenError::SyntaxError),
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|w| w == CRLF)
}

fn parse_line(src: &[u8]) -> Result<(&[u8], usize), WardenError> {
    find_crlf(src)
        .map(|pos| (&src[..pos], pos + CRLF_LEN))
        .ok_or(WardenError::IncompleteData)
}

fn parse_simple_string(src: &[u8]) -> Result<(RespFrame, usize), WardenError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::SimpleString(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_error(src: &[u8]) -> Result<(RespFrame, usize), WardenError> {
    let (line, len) = parse_line(&src[1..])?;
    Ok((
        RespFrame::Error(String::from_utf8_lossy(line).to_string()),
        len + 1,
    ))
}

fn parse_integer(src: &[u8]) -> Result<(RespFrame, usize), WardenError> {
    let (line, len) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let i = s.parse::<i64>().map_err(|_| WardenError::SyntaxError)?;
    Ok((RespFrame::Integer(i), len + 1))
}

fn parse_bulk_string(src: &[u8]) -> Result<(RespFrame, usize), WardenError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let str_len = s.parse::<isize>().map_err(|_| WardenError::SyntaxError)?;

    if str_len == -1 {
        return Ok((RespFrame::Null, len_of_line + 1));
    }
    let str_len = str_len as usize;
    if str_len > MAX_BULK_STRING_SIZE {
        return Err(WardenError::SyntaxError);
    }

    let total_len_prefix = len_of_line + 1;
    if src.len() < total_len_prefix + str_len + CRLF_LEN {
        return Err(WardenError::IncompleteData);
    }
    if &src[total_len_prefix + str_len..total_len_prefix + str_len + CRLF_LEN] != CRLF {
        return Err(WardenError::SyntaxError);
    }

    let data_start = total_len_prefix;
    let data_end = total_len_prefix + str_len;
    let data = Bytes::copy_from_slice(&src[data_start..data_end]);
    Ok((RespFrame::BulkString(data), data_end + CRLF_LEN))
}

fn parse_array(src: &[u8]) -> Result<(RespFrame, usize), WardenError> {
    let (line, len_of_line) = parse_line(&src[1..])?;
    let s = String::from_utf8_lossy(line);
    let arr_len = s.parse::<isize>().map_err(|_| WardenError::SyntaxError)?;

    if arr_len == -1 {
        return Ok((RespFrame::NullArray, len_of_line + 1));
    }
    let arr_len = arr_len as usize;
    if arr_len > MAX_FRAME_ELEMENTS {
        return Err(WardenError::SyntaxError);
    }

    let mut frames = Vec::with_capacity(arr_len);
    let mut cursor = len_of_line + 1;
    for _ in 0..arr_len {
        let (frame, frame_len) = parse_frame(&src[cursor..])?;
        frames.push(frame);
        cursor += frame_len;
    }
    Ok((RespFrame::Array(frames), cursor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: RespFrame) {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = RespFrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, decoded);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrips_all_variants() {
        roundtrip(RespFrame::SimpleString("OK".into()));
        roundtrip(RespFrame::Error("ERR nope".into()));
        roundtrip(RespFrame::Integer(-42));
        roundtrip(RespFrame::BulkString(Bytes::from_static(b"hello")));
        roundtrip(RespFrame::Null);
        roundtrip(RespFrame::NullArray);
        roundtrip(RespFrame::Array(vec![
            RespFrame::BulkString(Bytes::from_static(b"PING")),
            RespFrame::Integer(1),
        ]));
    }

    #[test]
    fn incomplete_array_waits_for_more_data() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n"[..]);
        assert!(RespFrameCodec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"$3\r\nbar\r\n");
        let frame = RespFrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            RespFrame::Array(vec![
                RespFrame::BulkString(Bytes::from_static(b"foo")),
                RespFrame::BulkString(Bytes::from_static(b"bar")),
            ])
        );
    }

    #[test]
    fn rejects_oversized_array_header() {
        let mut buf = BytesMut::from(&b"*99999999999\r\n"[..]);
        assert!(matches!(
            RespFrameCodec.decode(&mut buf),
            Err(WardenError::SyntaxError)
        ));
    }
}
