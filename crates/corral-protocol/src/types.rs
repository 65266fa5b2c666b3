//! Reply frame types.
//!
//! The [`Frame`] enum represents a single decoded reply. RESP3-only
//! reply types that carry nothing the orchestrator cares about are
//! folded into their closest RESP2 shape by the parser: sets and pushes
//! become arrays, verbatim strings become bulk strings, doubles and big
//! numbers become simple strings.

use bytes::Bytes;

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string reply, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array of frames, e.g. `*2\r\n+hello\r\n+world\r\n`.
    Array(Vec<Frame>),

    /// Null value: `_\r\n`, or the RESP2 forms `$-1\r\n` and `*-1\r\n`.
    Null,

    /// RESP3 boolean, e.g. `#t\r\n`.
    Boolean(bool),

    /// Ordered map of key-value frame pairs, e.g. `%1\r\n+key\r\n+val\r\n`.
    Map(Vec<(Frame, Frame)>),
}

impl Frame {
    /// Builds a command frame: an array of bulk strings.
    ///
    /// This is the only shape a server accepts from a client.
    pub fn command<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Frame::Array(
            tokens
                .into_iter()
                .map(|t| Frame::Bulk(Bytes::copy_from_slice(t.as_ref().as_bytes())))
                .collect(),
        )
    }

    /// Returns `true` if this frame is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns `true` for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Simple(s) if s == "OK")
    }

    /// Returns the textual payload of a string-like frame.
    ///
    /// Simple strings, errors and utf-8 bulk strings yield their text;
    /// everything else yields `None`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) | Frame::Error(s) => Some(s),
            Frame::Bulk(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}
