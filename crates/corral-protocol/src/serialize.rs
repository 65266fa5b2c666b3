//! Direct-to-buffer serialization.
//!
//! Commands always go out as arrays of bulk strings, but every frame
//! type can be written so scripted test servers can answer in kind.
//! Integer-to-string conversion uses `itoa`.

use bytes::{BufMut, BytesMut};

use crate::types::Frame;

impl Frame {
    /// Serializes this frame into the provided buffer, including type
    /// prefix and trailing `\r\n` delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => write_line(b'+', s.as_bytes(), dst),
            Frame::Error(msg) => write_line(b'-', msg.as_bytes(), dst),
            Frame::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                write_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(b'*');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
            Frame::Boolean(b) => write_line(b'#', if *b { b"t" } else { b"f" }, dst),
            Frame::Map(pairs) => {
                dst.put_u8(b'%');
                write_i64(pairs.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
        }
    }
}

fn write_line(prefix: u8, body: &[u8], dst: &mut BytesMut) {
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}
