//! Reply parser.
//!
//! Operates on buffered byte slices. The caller reads from the socket
//! into a buffer and calls [`parse_frame`] until it yields a frame;
//! the parser itself never blocks and never consumes the buffer, so a
//! partial reply can simply be retried once more bytes arrive.
//!
//! Replies are decoded in a single pass with a `Cursor<&[u8]>` tracking
//! the position. Running out of bytes anywhere surfaces as
//! `ProtocolError::Incomplete`, which [`parse_frame`] turns into
//! `Ok(None)`.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for aggregates.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in an aggregate.
const MAX_AGGREGATE_ELEMENTS: usize = 1_048_576;

/// Maximum length of a bulk string in bytes (512 MB, matching the server).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for `Vec::with_capacity` when decoding aggregates, so a large
/// declared count doesn't allocate before any element has arrived.
const PREALLOC_CAP: usize = 1024;

/// Checks whether `buf` holds a complete reply and decodes it.
///
/// Returns `Ok(Some((frame, consumed)))` if a complete frame was parsed,
/// `Ok(None)` if the buffer doesn't contain enough data yet,
/// or `Err(...)` if the data is malformed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);

    match try_parse(&mut cursor, 0) {
        Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    let prefix = read_byte(cursor)?;

    match prefix {
        b'+' => Ok(Frame::Simple(read_text_line(cursor, "simple string")?)),
        b'-' => Ok(Frame::Error(read_text_line(cursor, "error string")?)),
        b':' => Ok(Frame::Integer(read_integer_line(cursor)?)),
        // doubles and big numbers are only ever displayed, never computed on
        b',' => Ok(Frame::Simple(read_text_line(cursor, "double")?)),
        b'(' => Ok(Frame::Simple(read_text_line(cursor, "big number")?)),
        b'#' => match read_line(cursor)? {
            b"t" => Ok(Frame::Boolean(true)),
            b"f" => Ok(Frame::Boolean(false)),
            _ => Err(ProtocolError::InvalidBoolean),
        },
        b'_' => {
            let _ = read_line(cursor)?;
            Ok(Frame::Null)
        }
        b'$' | b'!' => match read_blob(cursor)? {
            Some(data) => Ok(Frame::Bulk(data)),
            None => Ok(Frame::Null),
        },
        b'=' => match read_blob(cursor)? {
            // verbatim strings carry a three-letter format tag: `txt:...`
            Some(data) if data.len() >= 4 && data[3] == b':' => Ok(Frame::Bulk(data.slice(4..))),
            Some(data) => Ok(Frame::Bulk(data)),
            None => Ok(Frame::Null),
        },
        b'*' | b'~' | b'>' => {
            let Some(count) = read_aggregate_len(cursor, depth)? else {
                return Ok(Frame::Null);
            };
            let mut frames = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                frames.push(try_parse(cursor, depth + 1)?);
            }
            Ok(Frame::Array(frames))
        }
        b'%' => {
            let Some(count) = read_aggregate_len(cursor, depth)? else {
                return Ok(Frame::Null);
            };
            let mut pairs = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                let key = try_parse(cursor, depth + 1)?;
                let val = try_parse(cursor, depth + 1)?;
                pairs.push((key, val));
            }
            Ok(Frame::Map(pairs))
        }
        b'|' => {
            // attributes precede the real reply; skip them
            let Some(count) = read_aggregate_len(cursor, depth)? else {
                return try_parse(cursor, depth);
            };
            for _ in 0..count * 2 {
                let _ = try_parse(cursor, depth + 1)?;
            }
            try_parse(cursor, depth)
        }
        other => Err(ProtocolError::InvalidPrefix(other)),
    }
}

// ---------------------------------------------------------------------------
// low-level cursor helpers
// ---------------------------------------------------------------------------

fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    if pos >= cursor.get_ref().len() {
        return Err(ProtocolError::Incomplete);
    }
    cursor.set_position((pos + 1) as u64);
    Ok(cursor.get_ref()[pos])
}

/// Returns the bytes up to (but not including) the next `\r\n`
/// and advances the cursor past it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = cursor.position() as usize;
    let end = find_crlf(cursor)?;
    Ok(&cursor.get_ref()[start..end])
}

fn read_text_line(cursor: &mut Cursor<&[u8]>, what: &'static str) -> Result<String, ProtocolError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8(what))
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    parse_i64_bytes(line)
}

/// Reads a length-prefixed blob. `None` is the RESP2 null (`$-1`).
fn read_blob(cursor: &mut Cursor<&[u8]>) -> Result<Option<Bytes>, ProtocolError> {
    let len = read_integer_line(cursor)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(ProtocolError::InvalidFrameLength(len));
    }
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::BulkStringTooLarge(len as usize));
    }
    let len = len as usize;

    // need `len` bytes of data plus the trailing \r\n
    if remaining(cursor) < len + 2 {
        return Err(ProtocolError::Incomplete);
    }

    let pos = cursor.position() as usize;
    let buf = cursor.get_ref();
    if buf[pos + len] != b'\r' || buf[pos + len + 1] != b'\n' {
        return Err(ProtocolError::InvalidFrameLength(len as i64));
    }
    let data = Bytes::copy_from_slice(&buf[pos..pos + len]);
    cursor.set_position((pos + len + 2) as u64);
    Ok(Some(data))
}

/// Reads an aggregate element count. `None` is the RESP2 null (`*-1`).
fn read_aggregate_len(
    cursor: &mut Cursor<&[u8]>,
    depth: usize,
) -> Result<Option<usize>, ProtocolError> {
    if depth + 1 > MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    let count = read_integer_line(cursor)?;
    if count == -1 {
        return Ok(None);
    }
    if count < 0 {
        return Err(ProtocolError::InvalidFrameLength(count));
    }
    if count as usize > MAX_AGGREGATE_ELEMENTS {
        return Err(ProtocolError::TooManyElements(count as usize));
    }
    Ok(Some(count as usize))
}

/// Finds the next `\r\n` starting at the cursor position.
/// Returns the index of `\r` and advances the cursor past the `\n`.
fn find_crlf(cursor: &mut Cursor<&[u8]>) -> Result<usize, ProtocolError> {
    let buf = cursor.get_ref();
    let mut pos = cursor.position() as usize;

    while pos < buf.len() {
        let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) else {
            break;
        };
        let cr = pos + offset;
        if cr + 1 < buf.len() && buf[cr + 1] == b'\n' {
            cursor.set_position((cr + 2) as u64);
            return Ok(cr);
        }
        // bare \r without \n, keep scanning past it
        pos = cr + 1;
    }

    Err(ProtocolError::Incomplete)
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor
        .get_ref()
        .len()
        .saturating_sub(cursor.position() as usize)
}

/// Parses an i64 directly from a byte slice without allocating.
///
/// Negative numbers accumulate downwards so `i64::MIN` is representable.
fn parse_i64_bytes(buf: &[u8]) -> Result<i64, ProtocolError> {
    let (negative, digits) = match buf.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, buf),
        None => return Err(ProtocolError::InvalidInteger),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    digits.iter().try_fold(0i64, |n, &b| {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let digit = (b - b'0') as i64;
        let n = n.checked_mul(10);
        if negative {
            n.and_then(|n| n.checked_sub(digit))
        } else {
            n.and_then(|n| n.checked_add(digit))
        }
        .ok_or(ProtocolError::InvalidInteger)
    })
}
