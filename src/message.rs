//! A thin adapter over the raw BER tag tree that exposes just the fields the
//! proxy session needs to read from or build into LDAP messages.
//!
//! Positional child access mirrors the ASN.1 module in RFC 4511 directly;
//! this is deliberately not a general-purpose LDAP object model.

use ber::{universal, PL, StructureTag, TagClass};

use crate::error::MessageError;

/// LDAP result codes this proxy names explicitly (RFC 4511 §4.1.9, Appendix A.1).
pub mod result_code {
    pub const SUCCESS: i64 = 0;
    pub const INVALID_CREDENTIALS: i64 = 49;
}

/// Context-specific filter choice tags (RFC 4511 §4.5.1.7.1).
mod filter_choice {
    pub const EQUALITY_MATCH: u64 = 3;
}

/// Application-class protocol operation tags (RFC 4511 §4.2, §4.5.1, Appendix B).
mod op_tag {
    pub const BIND_REQUEST: u64 = 0;
    pub const BIND_RESPONSE: u64 = 1;
    pub const SEARCH_REQUEST: u64 = 3;
    pub const SEARCH_RESULT_ENTRY: u64 = 4;
    pub const SEARCH_RESULT_DONE: u64 = 5;
}

/// The kind of protocol operation an LDAPMessage carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    BindRequest,
    BindResponse,
    SearchRequest,
    SearchResultEntry,
    SearchResultDone,
    Other(u64),
}

impl Operation {
    fn from_tag(id: u64) -> Operation {
        match id {
            op_tag::BIND_REQUEST => Operation::BindRequest,
            op_tag::BIND_RESPONSE => Operation::BindResponse,
            op_tag::SEARCH_REQUEST => Operation::SearchRequest,
            op_tag::SEARCH_RESULT_ENTRY => Operation::SearchResultEntry,
            op_tag::SEARCH_RESULT_DONE => Operation::SearchResultDone,
            other => Operation::Other(other),
        }
    }
}

/// A decoded `LDAPMessage` (RFC 4511 §4.1.1): a message id and a protocolOp.
pub struct LdapMessage {
    tag: StructureTag,
}

impl LdapMessage {
    /// Decodes the first LDAPMessage out of `bytes`, ignoring trailing bytes.
    pub fn parse(bytes: &[u8]) -> Result<LdapMessage, MessageError> {
        let tag = ber::parse(bytes)?;
        if tag.children().map(|c| c.len()).unwrap_or(0) < 2 {
            return Err(MessageError::UnexpectedShape("LDAPMessage needs messageID and protocolOp"));
        }
        Ok(LdapMessage { tag })
    }

    pub fn message_id(&self) -> Option<i64> {
        self.tag.child(0)?.as_integer()
    }

    fn proto_op(&self) -> Option<&StructureTag> {
        self.tag.child(1)
    }

    pub fn operation(&self) -> Option<Operation> {
        let op = self.proto_op()?;
        if op.class != TagClass::Application {
            return None;
        }
        Some(Operation::from_tag(op.id))
    }

    /// For a `BindRequest`: the bind DN (empty string for anonymous bind).
    pub fn bind_dn(&self) -> Option<&str> {
        self.proto_op()?.child(1)?.as_str()
    }

    /// For a `BindRequest`: whether the authentication choice is `simple`.
    pub fn is_simple_bind(&self) -> bool {
        self.proto_op()
            .and_then(|op| op.child(2))
            .map(|auth| auth.class == TagClass::Context && auth.id == 0 && !auth.is_constructed())
            .unwrap_or(false)
    }

    /// For a `BindRequest`: whether the authentication choice is `sasl`.
    pub fn is_sasl_bind(&self) -> bool {
        self.proto_op()
            .and_then(|op| op.child(2))
            .map(|auth| auth.class == TagClass::Context && auth.id == 3 && auth.is_constructed())
            .unwrap_or(false)
    }

    /// For a `BindResponse`: the result code.
    pub fn result_code(&self) -> Option<i64> {
        self.proto_op()?.child(0)?.as_integer()
    }

    /// For a `SearchRequest`: an `attr=value` equality filter, if that's the
    /// filter's shape. The filter occupies the 7th positional child
    /// (index 6) of the SearchRequest.
    pub fn equality_filter(&self) -> Option<(&str, &str)> {
        let filter = self.proto_op()?.child(6)?;
        if filter.class != TagClass::Context || filter.id != filter_choice::EQUALITY_MATCH {
            return None;
        }
        let attr = filter.child(0)?.as_str()?;
        let value = filter.child(1)?.as_str()?;
        Some((attr, value))
    }

    /// For a `SearchResultEntry`: the entry's DN.
    pub fn entry_dn(&self) -> Option<&str> {
        self.proto_op()?.child(0)?.as_str()
    }
}

/// Builds a minimal, well-formed `BindResponse` LDAPMessage carrying
/// `result_code` and the same message id as the bind it answers, with empty
/// matched-DN and diagnostic-message fields.
pub fn build_bind_response(message_id: i64, result_code: i64) -> Vec<u8> {
    let bind_response = StructureTag {
        class: TagClass::Application,
        id: op_tag::BIND_RESPONSE,
        payload: PL::C(vec![
            ber::integer_tag(TagClass::Universal, universal::ENUMERATED, result_code),
            ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, b""),
            ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, b""),
        ]),
    };
    let message = StructureTag {
        class: TagClass::Universal,
        id: universal::SEQUENCE,
        payload: PL::C(vec![
            ber::integer_tag(TagClass::Universal, universal::INTEGER, message_id),
            bind_response,
        ]),
    };
    let mut buf = Vec::new();
    ber::write_tag(&mut buf, &message);
    buf
}
