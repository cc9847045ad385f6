//! The per-connection proxy session: the bidirectional copy loop, the
//! authentication phase state machine, and the points where it consults the
//! DN↔login cache and calls out to the second-factor client.

use std::sync::Arc;

use log::{debug, error, warn};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::cache::DnLoginCache;
use crate::config::ProxyConfig;
use crate::message::{build_bind_response, result_code, LdapMessage, Operation};
use crate::second_factor::SecondFactorClient;

const READ_BUF_SIZE: usize = 8192;

/// Connection reset/broken pipe is treated the same as an orderly EOF: it
/// ends the affected direction without being surfaced as an error. Anything
/// else is logged at error level per the error taxonomy.
fn log_io_error(context: &str, e: &io::Error) {
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
            debug!("{}: connection closed ({})", context, e);
        }
        _ => error!("{}: {}", context, e),
    }
}

/// The authentication phase a session is in, carrying whatever payload that
/// phase needs. `AuthenticationFailed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthPhase {
    None,
    UserDnSearch { pending_login: String },
    BindRequested { user_login: String },
    AuthenticationFailed,
}

/// Derives the login a bind DN resolves to: the cached login if the DN has
/// been observed in a prior search result, otherwise the DN itself.
fn login_from_bind_dn(cache: &DnLoginCache, dn: &str) -> String {
    cache.get(dn).unwrap_or_else(|| dn.to_string())
}

/// Applies the client→server transition rules to a single chunk. Requests
/// are never rewritten; this only ever mutates `phase`.
fn inspect_request(phase: &mut AuthPhase, config: &ProxyConfig, cache: &DnLoginCache, buf: &[u8]) {
    let msg = match LdapMessage::parse(buf) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("request chunk did not decode as an LDAP message: {}", e);
            return;
        }
    };

    match msg.operation() {
        Some(Operation::SearchRequest) => {
            if let Some((attr, value)) = msg.equality_filter() {
                if matches!(attr.to_ascii_lowercase().as_str(), "cn" | "uid" | "samaccountname") {
                    *phase = AuthPhase::UserDnSearch { pending_login: value.to_string() };
                }
            }
        }
        Some(Operation::BindRequest) => {
            if msg.is_simple_bind() {
                let dn = msg.bind_dn().unwrap_or("");
                if !dn.is_empty() {
                    let login = login_from_bind_dn(cache, dn);
                    if !config.is_service_account(&login) {
                        *phase = AuthPhase::BindRequested { user_login: login };
                    }
                }
            }
            // SASL binds, anonymous binds, and service-account binds all
            // leave `phase` untouched per the session's transition table.
        }
        _ => {}
    }
}

/// What to do about a server→client chunk once the *synchronous* part of the
/// transition table has run. `PendingSecondFactor` defers the bind-success
/// decision: the caller must drop the phase lock, run the second-factor
/// call unlocked, then re-acquire the lock only to commit its outcome (see
/// `copy_responses`), so the second-factor call never holds up the
/// client→server direction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResponseDecision {
    PassThrough,
    PendingSecondFactor { user_login: String, message_id: i64 },
}

/// Applies the server→client transition rules that don't require the
/// second-factor call: cache population on a search result, and resetting
/// to `None` on a non-matching or non-success bind response. A successful
/// bind response is handed back as `PendingSecondFactor` without touching
/// `phase` yet; `copy_responses` commits the eventual outcome.
fn decide_response(phase: &mut AuthPhase, cache: &DnLoginCache, buf: &[u8]) -> ResponseDecision {
    let msg = match LdapMessage::parse(buf) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("response chunk did not decode as an LDAP message: {}", e);
            return ResponseDecision::PassThrough;
        }
    };

    match (phase.clone(), msg.operation()) {
        (AuthPhase::UserDnSearch { pending_login }, Some(Operation::SearchResultEntry)) => {
            if let Some(dn) = msg.entry_dn() {
                cache.put(dn.to_string(), pending_login);
            }
            *phase = AuthPhase::None;
            ResponseDecision::PassThrough
        }
        (AuthPhase::UserDnSearch { .. }, _) => {
            *phase = AuthPhase::None;
            ResponseDecision::PassThrough
        }
        (AuthPhase::BindRequested { user_login }, Some(Operation::BindResponse)) => {
            match msg.result_code() {
                Some(code) if code == result_code::SUCCESS => {
                    let message_id = msg.message_id().unwrap_or(0);
                    ResponseDecision::PendingSecondFactor { user_login, message_id }
                }
                Some(code) => {
                    debug!("upstream bind for {} returned result code {}", user_login, code);
                    *phase = AuthPhase::None;
                    ResponseDecision::PassThrough
                }
                None => {
                    *phase = AuthPhase::None;
                    ResponseDecision::PassThrough
                }
            }
        }
        _ => ResponseDecision::PassThrough,
    }
}

async fn copy_requests<R, W>(
    mut reader: R,
    mut writer: W,
    state: Arc<Mutex<AuthPhase>>,
    config: Arc<ProxyConfig>,
    cache: DnLoginCache,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log_io_error("client read error", &e);
                break;
            }
        };

        {
            let mut phase = state.lock().await;
            inspect_request(&mut phase, &config, &cache, &buf[..n]);
        }

        if let Err(e) = writer.write_all(&buf[..n]).await {
            log_io_error("upstream write error", &e);
            break;
        }
    }
}

async fn copy_responses<R, W>(
    mut reader: R,
    mut writer: W,
    state: Arc<Mutex<AuthPhase>>,
    cache: DnLoginCache,
    second_factor: Arc<dyn SecondFactorClient>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log_io_error("upstream read error", &e);
                break;
            }
        };

        let decision = {
            let mut phase = state.lock().await;
            decide_response(&mut phase, &cache, &buf[..n])
        };

        // The second-factor call, if any, runs with the phase lock released
        // so a concurrent client→server chunk is never held up by it. The
        // lock is re-acquired only to commit the decision it produced.
        let replacement = match decision {
            ResponseDecision::PassThrough => None,
            ResponseDecision::PendingSecondFactor { user_login, message_id } => {
                let allowed = second_factor.authenticate(&user_login).await;
                let mut phase = state.lock().await;
                if allowed {
                    *phase = AuthPhase::None;
                    None
                } else {
                    warn!("second factor refused login {}, closing session", user_login);
                    *phase = AuthPhase::AuthenticationFailed;
                    Some(build_bind_response(message_id, result_code::INVALID_CREDENTIALS))
                }
            }
        };

        let out: &[u8] = replacement.as_deref().unwrap_or(&buf[..n]);
        if let Err(e) = writer.write_all(out).await {
            log_io_error("client write error", &e);
            break;
        }

        let failed = matches!(*state.lock().await, AuthPhase::AuthenticationFailed);
        if failed {
            let _ = writer.shutdown().await;
            break;
        }
    }
}

/// Owns one client connection paired with one upstream connection and runs
/// them to completion. Generic over any duplex byte stream, so the caller
/// decides whether either side is TLS-wrapped.
pub struct ProxySession<C, U> {
    client: C,
    upstream: U,
    config: Arc<ProxyConfig>,
    cache: DnLoginCache,
    second_factor: Arc<dyn SecondFactorClient>,
}

impl<C, U> ProxySession<C, U>
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    U: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        client: C,
        upstream: U,
        config: Arc<ProxyConfig>,
        cache: DnLoginCache,
        second_factor: Arc<dyn SecondFactorClient>,
    ) -> ProxySession<C, U> {
        ProxySession { client, upstream, config, cache, second_factor }
    }

    /// Runs the session to completion: either direction closing ends both.
    pub async fn start(self) {
        let (client_read, client_write) = io::split(self.client);
        let (upstream_read, upstream_write) = io::split(self.upstream);
        let state = Arc::new(Mutex::new(AuthPhase::None));

        let mut request_task = tokio::spawn(copy_requests(
            client_read,
            upstream_write,
            state.clone(),
            self.config,
            self.cache.clone(),
        ));
        let mut response_task = tokio::spawn(copy_responses(
            upstream_read,
            client_write,
            state,
            self.cache,
            self.second_factor,
        ));

        tokio::select! {
            _ = &mut request_task => response_task.abort(),
            _ = &mut response_task => request_task.abort(),
        }
    }
}
