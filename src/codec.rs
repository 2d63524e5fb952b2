//! The node wire format: a small, hand-rolled, length-delimited record.
//!
//! Three logical fields, in order: a zigzag-varint node id, a
//! length-prefixed UTF-8 url, and a varint-counted repeated field of
//! zigzag-varint partitions. `available` is never written to, or read
//! from, the wire — it is derived from the availability tree at refresh
//! time (see `manager`). Anything left in the buffer after the three
//! known fields have been read is ignored, which is what lets a future
//! version of this crate append a fourth field without breaking readers
//! built against this one.

use crate::error::MembershipError;
use crate::node::Node;
use bytes::{BufMut, Bytes, BytesMut};

/// Defensive cap on a decoded partitions count, so a corrupt or adversarial
/// payload can't force an enormous allocation before the varints are even
/// validated.
const MAX_PARTITIONS: usize = 1_000_000;

/// Encodes a node into its wire payload. `node.available()` is not written.
pub fn encode(node: &Node) -> Bytes {
    let mut buf = BytesMut::new();
    write_svarint(&mut buf, node.id() as i64);

    let url_bytes = node.url().as_bytes();
    write_varint(&mut buf, url_bytes.len() as u64);
    buf.put_slice(url_bytes);

    write_varint(&mut buf, node.partitions().len() as u64);
    for &p in node.partitions() {
        write_svarint(&mut buf, p as i64);
    }

    buf.freeze()
}

/// Decodes a node payload. Fails with `MalformedNode` on a truncated or
/// structurally invalid buffer; never panics on attacker-controlled input.
pub fn decode(bytes: &[u8]) -> Result<Node, MembershipError> {
    let mut cursor = bytes;

    let id = read_svarint(&mut cursor)? as i32;

    let url_len = read_varint(&mut cursor)? as usize;
    if cursor.len() < url_len {
        return Err(MembershipError::MalformedNode(
            "truncated url field".to_string(),
        ));
    }
    let (url_bytes, rest) = cursor.split_at(url_len);
    let url = String::from_utf8(url_bytes.to_vec())
        .map_err(|e| MembershipError::MalformedNode(format!("url is not valid utf-8: {e}")))?;
    cursor = rest;

    let partitions_len = read_varint(&mut cursor)? as usize;
    if partitions_len > MAX_PARTITIONS {
        return Err(MembershipError::MalformedNode(format!(
            "partitions field claims {partitions_len} entries, exceeding the {MAX_PARTITIONS} cap"
        )));
    }
    let mut partitions = Vec::with_capacity(partitions_len);
    for _ in 0..partitions_len {
        partitions.push(read_svarint(&mut cursor)? as i32);
    }

    // Remaining bytes, if any, belong to fields this version doesn't know
    // about and are silently ignored.

    Node::new(id, url, partitions)
        .map_err(|e| MembershipError::MalformedNode(format!("decoded invalid node: {e}")))
}

fn write_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            break;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn write_svarint(buf: &mut BytesMut, value: i64) {
    // Zigzag: map signed to unsigned so small magnitudes (positive or
    // negative) stay short, matching how node ids and partition numbers
    // are actually distributed in practice.
    let zigzagged = ((value << 1) ^ (value >> 63)) as u64;
    write_varint(buf, zigzagged);
}

fn read_varint(cursor: &mut &[u8]) -> Result<u64, MembershipError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let Some((&byte, rest)) = cursor.split_first() else {
            return Err(MembershipError::MalformedNode(
                "truncated varint".to_string(),
            ));
        };
        *cursor = rest;
        if shift >= 64 {
            return Err(MembershipError::MalformedNode(
                "varint too long".to_string(),
            ));
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn read_svarint(cursor: &mut &[u8]) -> Result<i64, MembershipError> {
    let zigzagged = read_varint(cursor)?;
    Ok(((zigzagged >> 1) as i64) ^ -((zigzagged & 1) as i64))
}
