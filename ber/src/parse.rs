//! Decodes BER-encoded bytes into a [`StructureTag`] tree.
//!
//! The bit-level layout mirrors X.690 §8.1: the identifier octet carries
//! class (2 bits), primitive/constructed (1 bit) and tag number (5 bits).
//! A tag number field of all ones (`0x1f`) extends into a following
//! base-128 continuation sequence (high-tag-number form); LDAPv3 never
//! emits tag numbers needing it, but it is decoded for robustness. Length
//! octets follow either the short form (high bit clear, 7-bit length) or
//! the long form (high bit set, low 7 bits give a count of big-endian
//! length octets); `0x80` itself is indefinite length, which BER allows but
//! LDAP never uses, and is rejected rather than misread as a zero length.

use nom::bits::bits;
use nom::bits::complete::take as take_bits;
use nom::bytes::complete::take;
use nom::combinator::map_opt;
use nom::error::{Error as NomError, ErrorKind};
use nom::sequence::tuple;
use nom::IResult;

use crate::error::BerError;
use crate::tag::{StructureTag, TagClass, TagStructure, PL};

type BitInput<'a> = (&'a [u8], usize);

/// Tag number value signaling the low-tag-number field is exhausted and the
/// real tag number continues in following base-128 octets (X.690 §8.1.2.4).
const HIGH_TAG_NUMBER_MARKER: u64 = 0x1f;

fn class_bits(input: BitInput) -> IResult<BitInput, TagClass> {
    map_opt(take_bits(2usize), TagClass::from_u8)(input)
}

fn pc_bit(input: BitInput) -> IResult<BitInput, TagStructure> {
    map_opt(take_bits(1usize), TagStructure::from_u8)(input)
}

fn tagnr_bits(input: BitInput) -> IResult<BitInput, u64> {
    take_bits(5usize)(input)
}

fn parse_identifier_octet(input: &[u8]) -> IResult<&[u8], (TagClass, TagStructure, u64)> {
    bits::<_, _, NomError<BitInput>, _, _>(tuple((class_bits, pc_bit, tagnr_bits)))(input)
}

/// Decodes the base-128 continuation octets of a high-tag-number form tag
/// number: each octet contributes its low 7 bits, most significant octet
/// first, with the high bit set on every octet but the last.
fn parse_high_tag_number(input: &[u8]) -> IResult<&[u8], u64> {
    let mut id: u64 = 0;
    let mut rest = input;
    loop {
        let (next, octet) = take(1usize)(rest)?;
        let b = octet[0];
        id = (id << 7) | (b & 0x7f) as u64;
        rest = next;
        if b & 0x80 == 0 {
            return Ok((rest, id));
        }
    }
}

fn parse_type_header(input: &[u8]) -> IResult<&[u8], (TagClass, TagStructure, u64)> {
    let (input, (class, structure, low_tagnr)) = parse_identifier_octet(input)?;
    if low_tagnr != HIGH_TAG_NUMBER_MARKER {
        return Ok((input, (class, structure, low_tagnr)));
    }
    let (input, id) = parse_high_tag_number(input)?;
    Ok((input, (class, structure, id)))
}

fn parse_length(input: &[u8]) -> IResult<&[u8], u64> {
    let (rest, first) = take(1usize)(input)?;
    let first = first[0];
    if first == 0x80 {
        return Err(nom::Err::Failure(NomError::new(input, ErrorKind::Verify)));
    }
    if first & 0x80 == 0 {
        Ok((rest, (first & 0x7f) as u64))
    } else {
        let count = (first & 0x7f) as usize;
        let (rest, len_octets) = take(count)(rest)?;
        let len = len_octets.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        Ok((rest, len))
    }
}

/// Decodes a single tag, recursing into constructed payloads.
pub fn parse_tag(input: &[u8]) -> IResult<&[u8], StructureTag> {
    let (input, (class, structure, id)) = parse_type_header(input)?;
    let (input, len) = parse_length(input)?;
    let (input, payload) = match structure {
        TagStructure::Primitive => {
            let (input, content) = take(len as usize)(input)?;
            (input, PL::P(content.to_vec()))
        }
        TagStructure::Constructed => {
            let (input, content) = take(len as usize)(input)?;
            let mut rest = content;
            let mut children = Vec::new();
            while !rest.is_empty() {
                let (next, child) = parse_tag(rest)?;
                rest = next;
                children.push(child);
            }
            (input, PL::C(children))
        }
    };
    Ok((input, StructureTag { class, id, payload }))
}

/// Decodes the first top-level value in `input`, ignoring any trailing bytes.
///
/// A session hands each socket read to this function independently; see the
/// framing caveat this implies documented alongside the proxy's copy loop.
pub fn parse(input: &[u8]) -> Result<StructureTag, BerError> {
    parse_tag(input).map(|(_, tag)| tag).map_err(|e| match e {
        nom::Err::Incomplete(_) => BerError::Truncated,
        nom::Err::Error(e) | nom::Err::Failure(e) if e.code == ErrorKind::Verify => {
            BerError::IndefiniteLength
        }
        _ => BerError::Truncated,
    })
}
