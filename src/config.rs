//! Configuration surface: a TOML file layered under CLI flags, matching the
//! "flags for a quick run, file for a real deployment" split used elsewhere
//! in this ecosystem's LDAP tooling.

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;

fn default_second_factor_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
struct FileConfig {
    listen: Option<String>,
    upstream: Option<String>,
    second_factor_url: Option<String>,
    #[serde(default = "default_second_factor_timeout_ms")]
    second_factor_timeout_ms: u64,
    #[serde(default)]
    service_accounts: Vec<String>,
}

/// Command-line flags. Any flag given here overrides the same setting in
/// `--config`'s file.
#[derive(Parser, Debug)]
#[command(name = "ldap-2fa-proxy", about = "Transparent LDAP proxy enforcing a second authentication factor")]
pub struct Opts {
    /// Path to a TOML config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:389.
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Upstream LDAP server address to connect one new session per client connection.
    #[arg(short, long)]
    pub upstream: Option<String>,

    /// Base URL of the second-factor authentication service.
    #[arg(long)]
    pub second_factor_url: Option<String>,
}

/// Fully resolved configuration the proxy runs with.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_addr: SocketAddr,
    pub second_factor_url: String,
    pub second_factor_timeout: Duration,
    service_accounts: HashSet<String>,
}

impl ProxyConfig {
    pub fn load(opts: &Opts) -> Result<ProxyConfig, ConfigError> {
        let file_config = opts
            .config
            .as_ref()
            .map(|path| read_file_config(path))
            .transpose()?;

        let listen = opts
            .listen
            .clone()
            .or_else(|| file_config.as_ref().and_then(|c| c.listen.clone()))
            .ok_or(ConfigError::Missing("listen address"))?;
        let upstream = opts
            .upstream
            .clone()
            .or_else(|| file_config.as_ref().and_then(|c| c.upstream.clone()))
            .ok_or(ConfigError::Missing("upstream address"))?;
        let second_factor_url = opts
            .second_factor_url
            .clone()
            .or_else(|| file_config.as_ref().and_then(|c| c.second_factor_url.clone()))
            .ok_or(ConfigError::Missing("second-factor URL"))?;

        let listen_addr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(listen.clone()))?;
        let upstream_addr = upstream
            .parse()
            .map_err(|_| ConfigError::InvalidUpstreamAddr(upstream.clone()))?;

        let second_factor_timeout_ms = file_config
            .as_ref()
            .map(|c| c.second_factor_timeout_ms)
            .unwrap_or_else(default_second_factor_timeout_ms);
        let service_accounts = file_config
            .map(|c| c.service_accounts.iter().map(|s| s.to_lowercase()).collect())
            .unwrap_or_default();

        Ok(ProxyConfig {
            listen_addr,
            upstream_addr,
            second_factor_url,
            second_factor_timeout: Duration::from_millis(second_factor_timeout_ms),
            service_accounts,
        })
    }

    /// Whether `login` is a configured service account, exempt from
    /// second-factor enforcement. Compared case-insensitively.
    pub fn is_service_account(&self, login: &str) -> bool {
        self.service_accounts.contains(&login.to_lowercase())
    }
}

fn read_file_config(path: &PathBuf) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
