//! mTLS Listener Integration Tests
//!
//! Generates a throwaway CA, server and client certificates with rcgen, starts
//! the full gateway on 127.0.0.1:0 and talks to it with a tokio-rustls client.
//! WebSocket frames are written by hand so no client WebSocket crate is needed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use telemetry_gateway::config::GatewayConfig;
use telemetry_gateway::{AppState, Gateway};

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn issue(&self, cn: &str, sans: Vec<String>, usage: ExtendedKeyUsagePurpose) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(sans).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.extended_key_usages = vec![usage];
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert.pem(), key.serialize_pem())
    }
}

struct Harness {
    addr: SocketAddr,
    state: AppState,
    ca: Authority,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

async fn start_gateway() -> Harness {
    let ca = Authority::new("Test Fleet CA");
    let (server_pem, server_key) =
        ca.issue("localhost", vec!["localhost".into()], ExtendedKeyUsagePurpose::ServerAuth);

    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("server.key");
    let cert_path = dir.path().join("server.crt");
    let ca_path = dir.path().join("ca.crt");
    std::fs::write(&key_path, server_key).unwrap();
    std::fs::write(&cert_path, format!("{server_pem}{}", ca.cert.pem())).unwrap();
    std::fs::write(&ca_path, ca.cert.pem()).unwrap();

    let mut config = GatewayConfig::default();
    config.server.bind_addr = "127.0.0.1:0".into();
    config.server.hostname = "localhost".into();
    config.tls.key_path = key_path;
    config.tls.cert_path = cert_path;
    config.tls.ca_path = ca_path;
    config.dashboard.token = Some("dash-secret".into());
    config.fleet.enabled = false;

    let gateway = Gateway::bind(config).await.unwrap();
    let addr = gateway.local_addr().unwrap();
    let state = gateway.state();
    let cancel = CancellationToken::new();
    tokio::spawn(gateway.run(cancel.clone()));

    Harness {
        addr,
        state,
        ca,
        cancel,
        _dir: dir,
    }
}

fn connector(trust: &Authority, client_identity: Option<(String, String)>) -> TlsConnector {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut roots = RootCertStore::empty();
    roots.add(trust.cert.der().clone()).unwrap();

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots);

    let mut config = match client_identity {
        Some((cert_pem, key_pem)) => {
            let chain = CertificateDer::pem_slice_iter(cert_pem.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            let key = PrivateKeyDer::from_pem_slice(key_pem.as_bytes()).unwrap();
            builder.with_client_auth_cert(chain, key).unwrap()
        }
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    TlsConnector::from(Arc::new(config))
}

async fn connect(addr: SocketAddr, connector: &TlsConnector) -> io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from("localhost").unwrap();
    connector.connect(name, tcp).await
}

/// Send one HTTP/1.1 request and read the whole response.
async fn http_get(addr: SocketAddr, connector: &TlsConnector, path: &str) -> io::Result<String> {
    let mut tls = connect(addr, connector).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    tls.write_all(request.as_bytes()).await?;
    let mut buf = Vec::new();
    match tls.read_to_end(&mut buf).await {
        Ok(_) => {}
        // Peer closed without close_notify after a complete response.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !buf.is_empty() => {}
        Err(e) => return Err(e),
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Perform the WebSocket handshake and return the status line.
async fn upgrade(tls: &mut TlsStream<TcpStream>, path: &str) -> String {
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    tls.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(tls.read_u8().await.unwrap());
    }
    let head = String::from_utf8(head).unwrap();
    head.lines().next().unwrap_or_default().to_string()
}

/// Client frames must be masked.
fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < 126);
    let mask = [0x11, 0x22, 0x33, 0x44];
    let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

/// Read one unmasked server frame: (opcode, payload).
async fn read_frame(tls: &mut TlsStream<TcpStream>) -> (u8, Vec<u8>) {
    let b0 = tls.read_u8().await.unwrap();
    let b1 = tls.read_u8().await.unwrap();
    let len = match b1 & 0x7f {
        126 => usize::from(tls.read_u16().await.unwrap()),
        127 => usize::try_from(tls.read_u64().await.unwrap()).unwrap(),
        n => usize::from(n),
    };
    let mut payload = vec![0; len];
    tls.read_exact(&mut payload).await.unwrap();
    (b0 & 0x0f, payload)
}

#[tokio::test]
async fn test_client_with_valid_certificate_reaches_health() {
    let harness = start_gateway().await;
    let client = harness.ca.issue("5YJ3E1EA7KF000001", vec![], ExtendedKeyUsagePurpose::ClientAuth);

    let response = http_get(harness.addr, &connector(&harness.ca, Some(client)), "/health")
        .await
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
    assert!(response.contains("\"websocketEndpoints\""));

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_client_without_certificate_is_rejected() {
    let harness = start_gateway().await;

    let outcome = http_get(harness.addr, &connector(&harness.ca, None), "/health").await;
    if let Ok(response) = outcome {
        assert!(!response.contains("200 OK"), "unauthenticated client was served: {response}");
    }

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_client_from_foreign_ca_is_rejected() {
    let harness = start_gateway().await;
    let rogue = Authority::new("Rogue CA");
    let client = rogue.issue("5YJ3E1EA7KF000001", vec![], ExtendedKeyUsagePurpose::ClientAuth);

    let outcome = http_get(harness.addr, &connector(&harness.ca, Some(client)), "/health").await;
    if let Ok(response) = outcome {
        assert!(!response.contains("200 OK"), "foreign client was served: {response}");
    }

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_vehicle_message_is_acked_over_mtls() {
    let harness = start_gateway().await;
    let client = harness.ca.issue("5YJ3E1EA7KF000001", vec![], ExtendedKeyUsagePurpose::ClientAuth);
    let mut tls = connect(harness.addr, &connector(&harness.ca, Some(client)))
        .await
        .unwrap();

    let status = upgrade(&mut tls, "/vehicle").await;
    assert!(status.contains("101"), "upgrade failed: {status}");

    let payload = br#"{"messageId":"m-1","VehicleSpeed":55}"#;
    tls.write_all(&masked_frame(0x1, payload)).await.unwrap();

    let (opcode, body) = read_frame(&mut tls).await;
    assert_eq!(opcode, 0x1);
    let ack: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ack["messageType"], "ack");
    assert_eq!(ack["messageId"], "m-1");

    tls.write_all(&masked_frame(0x1, b"not json")).await.unwrap();
    let (_, body) = read_frame(&mut tls).await;
    let nack: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(nack["messageType"], "error_ack");

    // Counters move once the reply is written, which may trail our read.
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.state.stats.messages().rejected == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    let counts = harness.state.stats.messages();
    assert_eq!(counts.acked, 1);
    assert_eq!(counts.rejected, 1);

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_dashboard_with_wrong_token_gets_policy_close() {
    let harness = start_gateway().await;
    let client = harness.ca.issue("ops-console", vec![], ExtendedKeyUsagePurpose::ClientAuth);
    let mut tls = connect(harness.addr, &connector(&harness.ca, Some(client)))
        .await
        .unwrap();

    let status = upgrade(&mut tls, "/dashboard?token=wrong").await;
    assert!(status.contains("101"), "upgrade failed: {status}");

    let (opcode, body) = read_frame(&mut tls).await;
    assert_eq!(opcode, 0x8, "expected a close frame");
    assert_eq!(u16::from_be_bytes([body[0], body[1]]), 1008);
    assert_eq!(&body[2..], b"Unauthorized");
    assert_eq!(harness.state.broadcaster.member_count(), 0);

    harness.cancel.cancel();
}

/// A repeated `token` parameter is not an HTTP error: the first value is
/// checked on the open socket like any other credential.
#[tokio::test]
async fn test_dashboard_with_repeated_token_gets_policy_close() {
    let harness = start_gateway().await;
    let client = harness.ca.issue("ops-console", vec![], ExtendedKeyUsagePurpose::ClientAuth);
    let mut tls = connect(harness.addr, &connector(&harness.ca, Some(client)))
        .await
        .unwrap();

    let status = upgrade(&mut tls, "/dashboard?token=wrong&token=dash-secret").await;
    assert!(status.contains("101"), "upgrade failed: {status}");

    let (opcode, body) = read_frame(&mut tls).await;
    assert_eq!(opcode, 0x8, "expected a close frame");
    assert_eq!(u16::from_be_bytes([body[0], body[1]]), 1008);
    assert_eq!(harness.state.broadcaster.member_count(), 0);

    harness.cancel.cancel();
}

#[tokio::test]
async fn test_dashboard_receives_vehicle_telemetry() {
    let harness = start_gateway().await;

    let dash_id = harness.ca.issue("ops-console", vec![], ExtendedKeyUsagePurpose::ClientAuth);
    let mut dash = connect(harness.addr, &connector(&harness.ca, Some(dash_id)))
        .await
        .unwrap();
    assert!(upgrade(&mut dash, "/dashboard?token=dash-secret").await.contains("101"));
    let (_, greeting) = read_frame(&mut dash).await;
    let greeting: Value = serde_json::from_slice(&greeting).unwrap();
    assert_eq!(greeting["type"], "auth_success");

    while harness.state.broadcaster.member_count() == 0 {
        tokio::task::yield_now().await;
    }

    let car_id = harness.ca.issue("5YJ3E1EA7KF000001", vec![], ExtendedKeyUsagePurpose::ClientAuth);
    let mut car = connect(harness.addr, &connector(&harness.ca, Some(car_id)))
        .await
        .unwrap();
    assert!(upgrade(&mut car, "/vehicle").await.contains("101"));
    car.write_all(&masked_frame(0x1, br#"{"Soc":77}"#)).await.unwrap();
    let (_, ack) = read_frame(&mut car).await;
    assert_eq!(serde_json::from_slice::<Value>(&ack).unwrap()["messageType"], "ack");

    let (opcode, frame) = read_frame(&mut dash).await;
    assert_eq!(opcode, 0x1);
    let frame: Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(frame["type"], "telemetry");
    assert_eq!(frame["vin"], "5YJ3E1EA7KF000001");
    assert_eq!(frame["data"]["Soc"], 77);

    harness.cancel.cancel();
}
