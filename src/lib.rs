#[macro_use]
pub extern crate log;

pub mod cache;
pub mod config;
pub mod error;
pub mod message;
pub mod second_factor;
pub mod session;

pub use cache::DnLoginCache;
pub use config::{Opts, ProxyConfig};
pub use second_factor::{HttpSecondFactorClient, SecondFactorClient};
pub use session::ProxySession;
