//! Protocol error types for reply decoding.

use thiserror::Error;

/// Errors that can occur when decoding a server reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer doesn't hold a complete frame yet.
    /// The caller should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from the frame content.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or aggregate declared an invalid length.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A line-based frame (simple string, error, double) held invalid utf-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A boolean frame held something other than `t` or `f`.
    #[error("invalid boolean encoding")]
    InvalidBoolean,

    /// Aggregates nested deeper than the parser allows.
    #[error("frame nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A bulk string larger than the parser accepts.
    #[error("bulk string of {0} bytes exceeds the size limit")]
    BulkStringTooLarge(usize),

    /// An aggregate declared more elements than the parser accepts.
    #[error("aggregate of {0} elements exceeds the element limit")]
    TooManyElements(usize),
}
