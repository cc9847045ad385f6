//! Binds a listener, and for each accepted client connection opens one new
//! upstream connection and drives a `ProxySession` between them. TLS
//! termination is out of scope here; the session itself is generic over any
//! duplex byte stream.

use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};

use ldap_2fa_proxy::{config::Opts, DnLoginCache, HttpSecondFactorClient, ProxyConfig, ProxySession, SecondFactorClient};

#[tokio::main]
async fn main() {
    env_logger::init();

    let opts = Opts::parse();
    let config = match ProxyConfig::load(&opts) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let second_factor: Arc<dyn SecondFactorClient> = Arc::new(HttpSecondFactorClient::new(
        config.second_factor_url.clone(),
        config.second_factor_timeout,
    ));
    let cache = DnLoginCache::new();

    let listener = match TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    info!("listening on {}, forwarding to {}", config.listen_addr, config.upstream_addr);

    loop {
        let (client_stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        let upstream_addr = config.upstream_addr;
        let config = config.clone();
        let cache = cache.clone();
        let second_factor = second_factor.clone();

        tokio::spawn(async move {
            let upstream_stream = match TcpStream::connect(upstream_addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("failed to connect to upstream {} for {}: {}", upstream_addr, peer, e);
                    return;
                }
            };
            debug!("session started for {}", peer);
            ProxySession::new(client_stream, upstream_stream, config, cache, second_factor)
                .start()
                .await;
            debug!("session ended for {}", peer);
        });
    }
}
