//! Serializes a [`StructureTag`] tree back to BER bytes.
//!
//! Encoding only ever emits the minimal definite-length, low-tag-number
//! form; LDAP never needs anything else on the wire.

use crate::tag::{StructureTag, TagClass, TagStructure, PL};

fn encode_header(buf: &mut Vec<u8>, class: TagClass, structure: TagStructure, id: u64) {
    debug_assert!(id < 31, "high-tag-number form is never emitted here");
    let first = ((class as u8) << 6) | ((structure as u8) << 5) | (id as u8 & 0x1f);
    buf.push(first);
}

fn encode_length(buf: &mut Vec<u8>, len: usize) {
    if len < 128 {
        buf.push(len as u8);
        return;
    }
    let len_bytes = (len as u64).to_be_bytes();
    let first_nonzero = len_bytes.iter().position(|&b| b != 0).unwrap_or(len_bytes.len() - 1);
    let significant = &len_bytes[first_nonzero..];
    buf.push(0x80 | significant.len() as u8);
    buf.extend_from_slice(significant);
}

/// Appends the BER encoding of `tag` to `buf`.
pub fn write_tag(buf: &mut Vec<u8>, tag: &StructureTag) {
    match &tag.payload {
        PL::P(bytes) => {
            encode_header(buf, tag.class, TagStructure::Primitive, tag.id);
            encode_length(buf, bytes.len());
            buf.extend_from_slice(bytes);
        }
        PL::C(children) => {
            let mut inner = Vec::new();
            for child in children {
                write_tag(&mut inner, child);
            }
            encode_header(buf, tag.class, TagStructure::Constructed, tag.id);
            encode_length(buf, inner.len());
            buf.extend_from_slice(&inner);
        }
    }
}

/// Encodes `value` using the minimal two's-complement byte count, padding
/// with a leading zero byte when the most significant bit of that minimal
/// encoding would otherwise be set on a non-negative value.
pub fn integer_bytes(value: i64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 {
        let redundant = if value < 0 {
            bytes[0] == 0xff && bytes[1] & 0x80 != 0
        } else {
            bytes[0] == 0x00 && bytes[1] & 0x80 == 0
        };
        if redundant {
            bytes.remove(0);
        } else {
            break;
        }
    }
    bytes
}

pub fn integer_tag(class: TagClass, id: u64, value: i64) -> StructureTag {
    StructureTag {
        class,
        id,
        payload: PL::P(integer_bytes(value)),
    }
}

pub fn octet_string_tag(class: TagClass, id: u64, value: &[u8]) -> StructureTag {
    StructureTag {
        class,
        id,
        payload: PL::P(value.to_vec()),
    }
}

pub fn sequence_tag(class: TagClass, id: u64, children: Vec<StructureTag>) -> StructureTag {
    StructureTag {
        class,
        id,
        payload: PL::C(children),
    }
}
