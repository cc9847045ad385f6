//! A minimal BER/X.690 TLV codec covering the subset LDAPv3 framing needs:
//! low-tag-number identifiers, short- and long-form definite lengths, and
//! two's-complement INTEGER/ENUMERATED payloads. Indefinite length is not
//! supported; LDAP never emits it.

pub mod error;
pub mod parse;
pub mod tag;
pub mod write;

pub use error::BerError;
pub use parse::{parse, parse_tag};
pub use tag::{universal, PL, StructureTag, TagClass, TagStructure};
pub use write::{integer_bytes, integer_tag, octet_string_tag, sequence_tag, write_tag};
