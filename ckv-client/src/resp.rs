//! # RESP Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server replies over a
//! buffered reader, keeping allocations under the caller's control.
//!
//! ## Design Principles
//! 1. **Binary-Safe Bulk**: Bulk payloads stay raw bytes; simple strings
//!    and errors decode to text for ergonomic matching.
//! 2. **Buffer Reuse**: The caller owns the line buffer so repeated
//!    replies do not reallocate.
//! 3. **Fail Fast**: Any framing violation surfaces immediately.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// Nesting bound for array replies; protects against hostile framing.
const MAX_DEPTH: usize = 16;

/// One decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` style responses.
    Simple(String),
    /// `-ERR ...` responses.
    Error(String),
    /// `:123` responses.
    Integer(i64),
    /// `$...` bulk strings; `None` is the null bulk.
    Bulk(Option<Vec<u8>>),
    /// `*...` arrays.
    Array(Vec<Reply>),
}

impl Reply {
    /// Bulk or simple payload as text, when that is what arrived.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Reply::Simple(text) => Some(text.clone()),
            Reply::Bulk(Some(data)) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }
}

/// Encodes a command as a RESP multi-bulk request.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.clear();
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one reply from the buffered stream.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    read_reply_at(reader, line_buf, 0)
}

fn read_reply_at<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> ClientResult<Reply> {
    if depth > MAX_DEPTH {
        return Err(ClientError::Protocol);
    }
    read_line(reader, line_buf)?;
    let (kind, rest) = match line_buf.split_first() {
        Some(split) => split,
        None => return Err(ClientError::Protocol),
    };
    match kind {
        b'+' => Ok(Reply::Simple(String::from_utf8_lossy(rest).into_owned())),
        b'-' => Ok(Reply::Error(String::from_utf8_lossy(rest).into_owned())),
        b':' => Ok(Reply::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let mut data = vec![0u8; len as usize];
            reader.read_exact(&mut data)?;
            let mut crlf = [0u8; 2];
            reader.read_exact(&mut crlf)?;
            if crlf != [b'\r', b'\n'] {
                return Err(ClientError::Protocol);
            }
            Ok(Reply::Bulk(Some(data)))
        }
        b'*' => {
            let len = parse_i64(rest)?;
            if len <= 0 {
                return Ok(Reply::Array(Vec::new()));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_reply_at(reader, line_buf, depth + 1)?);
            }
            Ok(Reply::Array(items))
        }
        _ => Err(ClientError::Protocol),
    }
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 || buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(ClientError::Protocol)
}
