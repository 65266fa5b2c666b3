//! corral-protocol: client side of the RESP wire protocol.
//!
//! The orchestrator only ever talks to the servers it launches as a
//! client, so this crate covers exactly that direction: encoding a
//! command as an array of bulk strings and decoding whatever reply the
//! server sends back. Both RESP2 replies (null bulk strings and arrays)
//! and the RESP3 reply types a server may emit are understood.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use corral_protocol::{parse_frame, Frame};
//!
//! // encode a command
//! let mut buf = BytesMut::new();
//! Frame::command(["CLUSTER", "INFO"]).serialize(&mut buf);
//! assert_eq!(&buf[..], b"*2\r\n$7\r\nCLUSTER\r\n$4\r\nINFO\r\n");
//!
//! // decode a reply
//! let (frame, consumed) = parse_frame(b"+PONG\r\n").unwrap().unwrap();
//! assert_eq!(frame, Frame::Simple("PONG".into()));
//! assert_eq!(consumed, 7);
//! ```

pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use error::ProtocolError;
pub use parse::parse_frame;
pub use types::Frame;
