use thiserror::Error;

/// Failures that can occur while decoding a BER TLV tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BerError {
    #[error("input ended before a complete tag could be decoded")]
    Truncated,
    #[error("indefinite-length encoding is not supported")]
    IndefiniteLength,
}
