//! Error types for the proxy's own fallible operations.
//!
//! Per-chunk decode and authentication-policy failures are *not* represented
//! here; those are handled inline as the session's own decisions (log and
//! forward, or log and fail closed), not propagated as `Result`.

use thiserror::Error;

/// Failure to load or validate the proxy's configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid listen address {0}")]
    InvalidListenAddr(String),
    #[error("invalid upstream address {0}")]
    InvalidUpstreamAddr(String),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Failure while decoding or building an LDAP message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed BER encoding: {0}")]
    Ber(#[from] ber::BerError),
    #[error("LDAPMessage did not have the expected shape: {0}")]
    UnexpectedShape(&'static str),
}
