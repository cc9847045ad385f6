//! End-to-end tests driving a real `ProxySession` over in-process duplex
//! streams, standing in for the client socket and the upstream socket.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use ber::{universal, PL, StructureTag, TagClass};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use ldap_2fa_proxy::message::{build_bind_response, result_code, LdapMessage};
use ldap_2fa_proxy::second_factor::{AlwaysAllow, AlwaysDeny, SecondFactorClient};
use ldap_2fa_proxy::{DnLoginCache, ProxyConfig, ProxySession};

fn encode_message(message_id: i64, op: StructureTag) -> Vec<u8> {
    let message = StructureTag {
        class: TagClass::Universal,
        id: universal::SEQUENCE,
        payload: PL::C(vec![ber::integer_tag(TagClass::Universal, universal::INTEGER, message_id), op]),
    };
    let mut buf = Vec::new();
    ber::write_tag(&mut buf, &message);
    buf
}

fn bind_request(message_id: i64, dn: &str) -> Vec<u8> {
    let auth = StructureTag { class: TagClass::Context, id: 0, payload: PL::P(b"pw".to_vec()) };
    let bind = StructureTag {
        class: TagClass::Application,
        id: 0,
        payload: PL::C(vec![
            ber::integer_tag(TagClass::Universal, universal::INTEGER, 3),
            ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, dn.as_bytes()),
            auth,
        ]),
    };
    encode_message(message_id, bind)
}

fn sasl_bind_request(message_id: i64, dn: &str) -> Vec<u8> {
    let sasl = StructureTag {
        class: TagClass::Context,
        id: 3,
        payload: PL::C(vec![ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, b"GSSAPI")]),
    };
    let bind = StructureTag {
        class: TagClass::Application,
        id: 0,
        payload: PL::C(vec![
            ber::integer_tag(TagClass::Universal, universal::INTEGER, 3),
            ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, dn.as_bytes()),
            sasl,
        ]),
    };
    encode_message(message_id, bind)
}

fn search_request(message_id: i64, attr: &str, value: &str) -> Vec<u8> {
    let filter = StructureTag {
        class: TagClass::Context,
        id: 3,
        payload: PL::C(vec![
            ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, attr.as_bytes()),
            ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, value.as_bytes()),
        ]),
    };
    let children = vec![
        ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, b""),
        ber::integer_tag(TagClass::Universal, universal::ENUMERATED, 2),
        ber::integer_tag(TagClass::Universal, universal::ENUMERATED, 0),
        ber::integer_tag(TagClass::Universal, universal::INTEGER, 0),
        ber::integer_tag(TagClass::Universal, universal::INTEGER, 0),
        StructureTag { class: TagClass::Universal, id: universal::BOOLEAN, payload: PL::P(vec![0]) },
        filter,
    ];
    let search = StructureTag { class: TagClass::Application, id: 3, payload: PL::C(children) };
    encode_message(message_id, search)
}

fn search_result_entry(message_id: i64, dn: &str) -> Vec<u8> {
    let entry = StructureTag {
        class: TagClass::Application,
        id: 4,
        payload: PL::C(vec![
            ber::octet_string_tag(TagClass::Universal, universal::OCTET_STRING, dn.as_bytes()),
            StructureTag { class: TagClass::Universal, id: universal::SEQUENCE, payload: PL::C(vec![]) },
        ]),
    };
    encode_message(message_id, entry)
}

/// Writes a throwaway TOML config and returns its path, since service-account
/// membership is only settable through the file layer.
fn write_config_file(service_accounts: &[&str]) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("ldap-2fa-proxy-test-{}-{:?}.toml", std::process::id(), std::thread::current().id()));
    let accounts = service_accounts.iter().map(|s| format!("\"{}\"", s)).collect::<Vec<_>>().join(", ");
    let contents = format!(
        "listen = \"127.0.0.1:0\"\nupstream = \"127.0.0.1:0\"\nsecond_factor_url = \"http://127.0.0.1:0\"\nservice_accounts = [{}]\n",
        accounts
    );
    let mut file = std::fs::File::create(&path).expect("write temp config");
    file.write_all(contents.as_bytes()).expect("write temp config contents");
    path
}

fn test_config(service_accounts: &[&str]) -> ProxyConfig {
    let path = write_config_file(service_accounts);
    let opts = ldap_2fa_proxy::config::Opts {
        config: Some(path.clone()),
        listen: None,
        upstream: None,
        second_factor_url: None,
    };
    let config = ProxyConfig::load(&opts).expect("load test config");
    let _ = std::fs::remove_file(&path);
    config
}

/// Spawns a session wired over two duplex pairs, returning the ends a test
/// drives as the fake client and the fake upstream server.
fn spawn_session(
    config: ProxyConfig,
    cache: DnLoginCache,
    second_factor: Arc<dyn SecondFactorClient>,
) -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
    let (client_side, test_client) = tokio::io::duplex(8192);
    let (upstream_side, test_server) = tokio::io::duplex(8192);
    let session = ProxySession::new(client_side, upstream_side, Arc::new(config), cache, second_factor);
    tokio::spawn(session.start());
    (test_client, test_server)
}

async fn read_chunk(stream: &mut tokio::io::DuplexStream) -> Vec<u8> {
    let mut buf = vec![0u8; 8192];
    let n = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf.truncate(n);
    buf
}

#[tokio::test]
async fn simple_bind_accepted_by_second_factor_passes_through_unchanged() {
    let (mut client, mut server) = spawn_session(test_config(&[]), DnLoginCache::new(), Arc::new(AlwaysAllow));

    let request = bind_request(1, "CN=alice,OU=u,DC=x");
    client.write_all(&request).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, request);

    let response = build_bind_response(1, result_code::SUCCESS);
    server.write_all(&response).await.unwrap();
    assert_eq!(read_chunk(&mut client).await, response);
}

#[tokio::test]
async fn simple_bind_refused_by_second_factor_synthesizes_invalid_credentials_and_closes() {
    let (mut client, mut server) = spawn_session(test_config(&[]), DnLoginCache::new(), Arc::new(AlwaysDeny));

    let request = bind_request(7, "CN=alice,OU=u,DC=x");
    client.write_all(&request).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, request);

    let response = build_bind_response(7, result_code::SUCCESS);
    server.write_all(&response).await.unwrap();

    let seen = read_chunk(&mut client).await;
    let msg = LdapMessage::parse(&seen).unwrap();
    assert_eq!(msg.message_id(), Some(7));
    assert_eq!(msg.result_code(), Some(result_code::INVALID_CREDENTIALS));

    // The session closed the client-facing stream after the synthetic
    // response; a further read observes EOF.
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf)).await.expect("timed out").unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn search_then_bind_resolves_cached_login_for_second_factor() {
    let cache = DnLoginCache::new();
    let second_factor = Arc::new(RecordingSecondFactor::default());
    let (mut client, mut server) = spawn_session(test_config(&[]), cache.clone(), second_factor.clone());

    let search = search_request(1, "uid", "alice");
    client.write_all(&search).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, search);

    let entry = search_result_entry(1, "CN=alice,OU=u,DC=x");
    server.write_all(&entry).await.unwrap();
    assert_eq!(read_chunk(&mut client).await, entry);

    assert_eq!(cache.get("CN=alice,OU=u,DC=x"), Some("alice".to_string()));

    let bind = bind_request(2, "CN=alice,OU=u,DC=x");
    client.write_all(&bind).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, bind);

    let response = build_bind_response(2, result_code::SUCCESS);
    server.write_all(&response).await.unwrap();
    assert_eq!(read_chunk(&mut client).await, response);

    assert_eq!(second_factor.logins(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn service_account_bind_never_invokes_second_factor() {
    let second_factor = Arc::new(RecordingSecondFactor::default());
    let (mut client, mut server) =
        spawn_session(test_config(&["svc"]), DnLoginCache::new(), second_factor.clone());

    let request = bind_request(1, "svc");
    client.write_all(&request).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, request);

    let response = build_bind_response(1, result_code::SUCCESS);
    server.write_all(&response).await.unwrap();
    assert_eq!(read_chunk(&mut client).await, response);

    assert!(second_factor.logins().is_empty());
}

#[tokio::test]
async fn anonymous_bind_never_invokes_second_factor() {
    let second_factor = Arc::new(RecordingSecondFactor::default());
    let (mut client, mut server) = spawn_session(test_config(&[]), DnLoginCache::new(), second_factor.clone());

    let request = bind_request(1, "");
    client.write_all(&request).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, request);

    let response = build_bind_response(1, result_code::SUCCESS);
    server.write_all(&response).await.unwrap();
    assert_eq!(read_chunk(&mut client).await, response);

    assert!(second_factor.logins().is_empty());
}

#[tokio::test]
async fn sasl_bind_passes_through_without_second_factor() {
    let second_factor = Arc::new(RecordingSecondFactor::default());
    let (mut client, mut server) = spawn_session(test_config(&[]), DnLoginCache::new(), second_factor.clone());

    let request = sasl_bind_request(1, "CN=alice,OU=u,DC=x");
    client.write_all(&request).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, request);

    let response = build_bind_response(1, result_code::SUCCESS);
    server.write_all(&response).await.unwrap();
    assert_eq!(read_chunk(&mut client).await, response);

    assert!(second_factor.logins().is_empty());
}

#[tokio::test]
async fn malformed_request_chunk_is_forwarded_unchanged() {
    let (mut client, mut server) = spawn_session(test_config(&[]), DnLoginCache::new(), Arc::new(AlwaysAllow));

    let garbage = vec![0xff, 0x01, 0x02];
    client.write_all(&garbage).await.unwrap();
    assert_eq!(read_chunk(&mut server).await, garbage);
}

#[derive(Default)]
struct RecordingSecondFactor {
    seen: std::sync::Mutex<Vec<String>>,
}

impl RecordingSecondFactor {
    fn logins(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SecondFactorClient for RecordingSecondFactor {
    async fn authenticate(&self, login: &str) -> bool {
        self.seen.lock().unwrap().push(login.to_string());
        true
    }
}
