//! # RESP Framing
//!
//! Purpose: Decode client requests (multi-bulk and inline) from the read
//! buffer and encode every reply kind the server produces.
//!
//! ## Design Principles
//! 1. **Incomplete Is Not An Error**: A partial frame returns `None` and
//!    leaves the buffer untouched; only malformed framing fails.
//! 2. **Binary-Safe**: Bulk strings are raw bytes end to end.
//! 3. **Bounded Input**: Argument and bulk lengths are capped so a hostile
//!    header cannot force a huge allocation.

use bytes::{Buf, BytesMut};

use ckv_common::KvError;

/// Maximum arguments in one request.
const MAX_ARGS: usize = 64 * 1024;

/// Maximum size of a single bulk argument (64 MiB).
const MAX_BULK: usize = 64 * 1024 * 1024;

/// RESP framing failure; the connection is closed after reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Request parser over the connection read buffer.
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Attempts to decode one request from the front of `buffer`.
    ///
    /// Returns `Ok(None)` until a complete frame is available; a decoded
    /// frame is consumed from the buffer.
    pub fn parse(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        if buffer[0] == b'*' {
            parse_multibulk(buffer)
        } else {
            parse_inline(buffer)
        }
    }
}

impl Default for RespParser {
    fn default() -> Self {
        RespParser::new()
    }
}

fn parse_multibulk(buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
    let data = &buffer[..];
    let header_end = match find_crlf(data, 1) {
        Some(end) => end,
        None => return Ok(None),
    };
    let count = parse_len(&data[1..header_end])?;
    if count > MAX_ARGS {
        return Err(RespError::Protocol);
    }

    let mut args = Vec::new();
    let mut pos = header_end + 2;
    for _ in 0..count {
        if pos >= data.len() {
            return Ok(None);
        }
        if data[pos] != b'$' {
            return Err(RespError::Protocol);
        }
        let len_end = match find_crlf(data, pos + 1) {
            Some(end) => end,
            None => return Ok(None),
        };
        let len = parse_len(&data[pos + 1..len_end])?;
        if len > MAX_BULK {
            return Err(RespError::Protocol);
        }
        let start = len_end + 2;
        if data.len() < start + len + 2 {
            return Ok(None);
        }
        if data[start + len] != b'\r' || data[start + len + 1] != b'\n' {
            return Err(RespError::Protocol);
        }
        args.push(data[start..start + len].to_vec());
        pos = start + len + 2;
    }

    buffer.advance(pos);
    Ok(Some(args))
}

fn parse_inline(buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
    let data = &buffer[..];
    let end = match find_crlf(data, 0) {
        Some(end) => end,
        None => return Ok(None),
    };
    let args: Vec<Vec<u8>> = data[..end]
        .split(|byte| byte.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_vec())
        .collect();
    buffer.advance(end + 2);
    if args.is_empty() {
        // Blank line: consumed, nothing to dispatch yet.
        return Ok(None);
    }
    Ok(Some(args))
}

fn find_crlf(data: &[u8], start: usize) -> Option<usize> {
    let mut idx = start;
    while idx + 1 < data.len() {
        if data[idx] == b'\r' && data[idx + 1] == b'\n' {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

fn parse_len(data: &[u8]) -> Result<usize, RespError> {
    if data.is_empty() {
        return Err(RespError::Protocol);
    }
    let mut value: usize = 0;
    for &byte in data {
        if !byte.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value
            .saturating_mul(10)
            .saturating_add((byte - b'0') as usize);
    }
    Ok(value)
}

/// `+message\r\n`
pub fn simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `-ERR message\r\n`
pub fn error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 7);
    buf.extend_from_slice(b"-ERR ");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Serializes a handler failure as a RESP error line.
pub fn error_reply(err: &KvError) -> Vec<u8> {
    error(&err.to_string())
}

/// `:value\r\n`
pub fn integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `$len\r\ndata\r\n`
pub fn bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Null bulk string.
pub fn null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// `*n\r\n` followed by the pre-encoded items.
pub fn array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(items.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in items {
        buf.extend_from_slice(item);
    }
    buf
}

/// Encodes a command as a multi-bulk request, the format the append log
/// stores and clients send.
pub fn encode_command(args: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(args.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        buf.extend_from_slice(b"$");
        buf.extend_from_slice(arg.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        let mut buffer = BytesMut::from(input);
        RespParser::new().parse(&mut buffer)
    }

    #[test]
    fn parses_multibulk_request() {
        let parsed = parse_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()]);
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let mut buffer = BytesMut::from(&b"*2\r\n$4\r\nPING\r\n$2\r\nhi"[..]);
        let mut parser = RespParser::new();
        assert_eq!(parser.parse(&mut buffer), Ok(None));
        // Nothing consumed while waiting.
        assert_eq!(buffer.len(), 20);

        buffer.extend_from_slice(b"\r\n");
        let parsed = parser.parse(&mut buffer).unwrap().unwrap();
        assert_eq!(parsed, vec![b"PING".to_vec(), b"hi".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn consumes_only_one_frame() {
        let mut buffer = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n"[..]);
        let mut parser = RespParser::new();
        assert!(parser.parse(&mut buffer).unwrap().is_some());
        assert_eq!(buffer.len(), 14);
        assert!(parser.parse(&mut buffer).unwrap().is_some());
        assert!(buffer.is_empty());
    }

    #[test]
    fn parses_inline_request() {
        let parsed = parse_all(b"GET foo\r\n").unwrap().unwrap();
        assert_eq!(parsed, vec![b"GET".to_vec(), b"foo".to_vec()]);
    }

    #[test]
    fn rejects_bad_framing() {
        assert_eq!(parse_all(b"*x\r\n"), Err(RespError::Protocol));
        assert_eq!(
            parse_all(b"*1\r\n#3\r\nfoo\r\n"),
            Err(RespError::Protocol)
        );
        assert_eq!(
            parse_all(b"*1\r\n$3\r\nfooXX"),
            Err(RespError::Protocol)
        );
    }

    #[test]
    fn replies_are_framed() {
        assert_eq!(simple("OK"), b"+OK\r\n");
        assert_eq!(error("boom"), b"-ERR boom\r\n");
        assert_eq!(integer(-3), b":-3\r\n");
        assert_eq!(bulk(b"hey"), b"$3\r\nhey\r\n");
        assert_eq!(null(), b"$-1\r\n");
        let reply = array(&[bulk(b"a"), integer(1)]);
        assert_eq!(reply, b"*2\r\n$1\r\na\r\n:1\r\n");
    }

    #[test]
    fn command_encoding_round_trips() {
        let args = vec!["ZADD".to_string(), "k".to_string(), "1".to_string()];
        let encoded = encode_command(&args);
        let parsed = parse_all(&encoded).unwrap().unwrap();
        let back: Vec<String> = parsed
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        assert_eq!(back, args);
    }
}
