//! Full confirmation flow: reject, notify, redeem, relay

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::Request;
use gatekeeper::api::{AdminAllowList, ApiState, create_api_router};
use gatekeeper::{
    AllowList, ConnectionOutcome, ConnectionRegistry, Notification, Notifier, ProxyConfig,
    ProxyServer, Result, StepUpAuthenticator,
};
use gatekeeper_core::LogSink;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingNotifier {
    batches: Mutex<Vec<Vec<Notification>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, batch: Vec<Notification>) -> Result<()> {
        self.batches.lock().await.push(batch);
        Ok(())
    }
}

impl RecordingNotifier {
    async fn wait_for(&self, count: usize) -> Vec<Vec<Notification>> {
        for _ in 0..400 {
            {
                let batches = self.batches.lock().await;
                if batches.len() >= count {
                    return batches.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} notification batches");
    }
}

struct Harness {
    _temp_dir: TempDir,
    notifier: Arc<RecordingNotifier>,
    auth: Arc<StepUpAuthenticator>,
    registry: ConnectionRegistry,
    proxy: Arc<ProxyServer>,
    backend: TcpListener,
}

async fn harness() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let allowlist = AllowList::load(temp_dir.path().join("whitelist.json"))
        .await
        .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let auth = Arc::new(StepUpAuthenticator::new(
        Arc::new(allowlist),
        notifier.clone(),
        vec!["ops@example.com".to_string()],
        "http://gate.test/api",
        "rdp-host",
    ));
    let registry = ConnectionRegistry::new();
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = Arc::new(ProxyServer::new(
        ProxyConfig {
            backend_addr: backend.local_addr().unwrap().to_string(),
            connect_timeout: Duration::from_secs(2),
        },
        auth.clone(),
        registry.clone(),
    ));

    Harness {
        _temp_dir: temp_dir,
        notifier,
        auth,
        registry,
        proxy,
        backend,
    }
}

/// Connected (client, accepted) pair over loopback
async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (accepted, _) = listener.accept().await.unwrap();
    (client, accepted)
}

fn code_from_link(body: &str) -> String {
    let (_, code) = body.split_once("authenticate?code=").unwrap();
    code.trim().to_string()
}

async fn redeem_via_api(harness: &Harness, code: &str) -> String {
    let state = ApiState {
        auth: harness.auth.clone(),
        log: LogSink::in_memory(),
        registry: harness.registry.clone(),
        admin_ips: Arc::new(AdminAllowList::default()),
    };
    let request = Request::builder()
        .uri(format!("/api/authenticate?code={code}"))
        .extension(ConnectInfo("127.0.0.1:45000".parse::<SocketAddr>().unwrap()))
        .body(Body::empty())
        .unwrap();

    let response = create_api_router(state).oneshot(request).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_unknown_ip_confirmed_by_email_then_relayed() {
    let harness = harness().await;
    let peer: SocketAddr = "10.0.0.5:50123".parse().unwrap();

    // First attempt is rejected and closed
    let (mut client, accepted) = socket_pair().await;
    let outcome = harness.proxy.handle_connection(accepted, peer).await.unwrap();
    assert_eq!(outcome, ConnectionOutcome::Rejected);
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);

    // A retry before confirmation does not mail again
    let (_client, accepted) = socket_pair().await;
    let outcome = harness.proxy.handle_connection(accepted, peer).await.unwrap();
    assert_eq!(outcome, ConnectionOutcome::Rejected);

    let batches = harness.notifier.wait_for(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.notifier.batches.lock().await.len(), 1);

    let notification = &batches[0][0];
    assert_eq!(notification.to, "ops@example.com");
    assert!(notification.body.contains("10.0.0.5"));
    assert!(notification.body.contains("http://gate.test/api/authenticate?code="));

    // Operator follows the link
    let code = code_from_link(&notification.body);
    assert_eq!(redeem_via_api(&harness, &code).await, "success");
    assert!(harness.auth.allowlist().contains("10.0.0.5").await);
    assert_eq!(redeem_via_api(&harness, &code).await, "invalid code");

    // Next attempt is relayed to the backend
    let (mut client, accepted) = socket_pair().await;
    let handling = {
        let proxy = harness.proxy.clone();
        tokio::spawn(async move { proxy.handle_connection(accepted, peer).await })
    };
    let (mut upstream, _) = timeout(Duration::from_secs(5), harness.backend.accept())
        .await
        .unwrap()
        .unwrap();

    client.write_all(b"mstshash=operator").await.unwrap();
    let mut received = [0u8; 17];
    upstream.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, b"mstshash=operator");

    upstream.write_all(b"ack").await.unwrap();
    let mut reply = [0u8; 3];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"ack");

    let active = harness.registry.list_all().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].peer_addr, peer);

    drop(client);
    let outcome = timeout(Duration::from_secs(5), handling)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match outcome {
        ConnectionOutcome::Relayed(stats) => {
            assert_eq!(stats.a_to_b, 17);
            assert_eq!(stats.b_to_a, 3);
        }
        other => panic!("expected relayed connection, got {other:?}"),
    }
    assert!(harness.registry.is_empty().await);
}

#[tokio::test]
async fn test_accept_loop_gates_real_connections() {
    let harness = harness().await;
    let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let front_addr = front.local_addr().unwrap();
    let accept_loop = tokio::spawn(harness.proxy.clone().run(front));

    // Loopback caller is unknown: closed without reaching the backend
    let mut client = TcpStream::connect(front_addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    let batches = harness.notifier.wait_for(1).await;
    let code = code_from_link(&batches[0][0].body);
    assert_eq!(redeem_via_api(&harness, &code).await, "success");

    let mut client = TcpStream::connect(front_addr).await.unwrap();
    let (mut upstream, _) = timeout(Duration::from_secs(5), harness.backend.accept())
        .await
        .unwrap()
        .unwrap();
    client.write_all(b"hi").await.unwrap();
    let mut received = [0u8; 2];
    upstream.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, b"hi");

    accept_loop.abort();
}
