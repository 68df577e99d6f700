//! End-to-end: a SOCKS5 client through the proxy to a local echo server,
//! with names resolved through the DoH bridge against a fake DoH server.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use bytes::Bytes;
use doh_bridge::{Provider, ProviderConfig, ResolverBridge, SystemResolver};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use doh5::{Config, Dialer, ListenAddr, Listener, Server};

const SUCCESS_REPLY: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

async fn spawn_echo() -> SocketAddr {
    spawn_echo_on("127.0.0.1:0").await
}

async fn spawn_echo_on(bind: &str) -> SocketAddr {
    let listener = TcpListener::bind(bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Answers A queries with 127.0.0.1 and AAAA queries with ::1.
async fn fake_doh(State(hits): State<Arc<AtomicUsize>>, body: Bytes) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);

    let mut pos = 12;
    while body[pos] != 0 {
        pos += body[pos] as usize + 1;
    }
    let qtype = u16::from_be_bytes([body[pos + 1], body[pos + 2]]);
    pos += 5;

    let mut answer = body[..pos].to_vec();
    answer[2] = 0x81;
    answer[3] = 0x80;
    answer[6..12].copy_from_slice(&[0, 0, 0, 0, 0, 0]);
    if qtype == 1 {
        answer[7] = 1;
        answer.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 127, 0, 0, 1]);
    } else if qtype == 28 {
        answer[7] = 1;
        answer.extend_from_slice(&[0xc0, 0x0c, 0, 28, 0, 1, 0, 0, 0, 60, 0, 16]);
        answer.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
    }
    ([(header::CONTENT_TYPE, "application/dns-udpwireformat")], answer)
}

async fn spawn_doh_bridge() -> (Arc<AtomicUsize>, ResolverBridge) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/dns-query", post(fake_doh))
        .with_state(hits.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let endpoint = format!("http://{}/dns-query", addr).parse().unwrap();
    let bridge = ResolverBridge::bind(ProviderConfig::direct(endpoint))
        .await
        .unwrap();
    (hits, bridge)
}

/// Start a server, returning its address and the trigger that stops it.
async fn spawn_server(dialer: Dialer) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = Listener::bind(&ListenAddr::Tcp("127.0.0.1:0".into()))
        .await
        .unwrap();
    let addr = listener.tcp_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(Server::new(listener, dialer).run(async {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx)
}

async fn socks_connect<S>(stream: &mut S, request: &[u8])
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    stream.write_all(request).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, SUCCESS_REPLY);
}

async fn assert_echoes<S>(stream: &mut S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload: Vec<u8> = (0..=255u8).collect();
    stream.write_all(&payload).await.unwrap();
    let mut got = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, payload);
}

fn domain_request(name: &str, port: u16) -> Vec<u8> {
    let mut request = vec![0x05, 0x01, 0x00, 0x03, name.len() as u8];
    request.extend_from_slice(name.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}

#[tokio::test]
async fn test_domain_connect_resolves_over_doh() {
    let echo = spawn_echo().await;
    let (hits, bridge) = spawn_doh_bridge().await;
    let resolver = Arc::new(bridge.resolver().unwrap());
    bridge.start();

    let (proxy, _stop) = spawn_server(Dialer::new(None, resolver)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    socks_connect(&mut client, &domain_request("echo.doh5.example", echo.port())).await;
    assert_echoes(&mut client).await;

    assert!(hits.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_ipv6_source_dials_dual_stack_name_over_ipv6() {
    let echo = spawn_echo_on("[::1]:0").await;
    let (_hits, bridge) = spawn_doh_bridge().await;
    let resolver = Arc::new(bridge.resolver().unwrap());
    bridge.start();

    let source = IpAddr::V6(Ipv6Addr::LOCALHOST);
    let (proxy, _stop) = spawn_server(Dialer::new(Some(source), resolver)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    socks_connect(&mut client, &domain_request("dual.doh5.example", echo.port())).await;
    assert_echoes(&mut client).await;
}

#[tokio::test]
async fn test_ipv4_connect_with_system_resolver() {
    let echo = spawn_echo().await;
    let (proxy, _stop) = spawn_server(Dialer::new(None, Arc::new(SystemResolver))).await;

    let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&echo.port().to_be_bytes());

    let mut client = TcpStream::connect(proxy).await.unwrap();
    socks_connect(&mut client, &request).await;
    assert_echoes(&mut client).await;
}

#[tokio::test]
async fn test_bad_greeting_is_closed_without_reply() {
    let (proxy, _stop) = spawn_server(Dialer::new(None, Arc::new(SystemResolver))).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_unreachable_destination_closes_after_method_reply() {
    // Grab a free port, then close it so nothing listens there.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (proxy, _stop) = spawn_server(Dialer::new(None, Arc::new(SystemResolver))).await;

    let mut request = vec![0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&port.to_be_bytes());

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&request).await.unwrap();

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rest, vec![0x05, 0x00]);
}

#[tokio::test]
async fn test_unknown_provider_is_fatal_at_startup() {
    let err = match ResolverBridge::from_provider("nextdns").await {
        Ok(_) => panic!("unknown provider must not fall back to anything"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("nextdns"));
}

#[tokio::test]
async fn test_run_serves_until_shutdown() {
    let config = Config {
        listen: ListenAddr::Tcp("127.0.0.1:0".into()),
        source: None,
        provider: Provider::Disabled,
        quiet: false,
    };

    tokio::time::timeout(Duration::from_secs(5), doh5::run(config, async {}))
        .await
        .unwrap()
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_listener_serves_and_cleans_up() {
    use tokio::net::UnixStream;

    let echo = spawn_echo().await;
    let path = std::env::temp_dir().join(format!("doh5-test-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let listener = Listener::bind(&ListenAddr::Unix(path.clone())).await.unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::new(listener, Dialer::new(None, Arc::new(SystemResolver))).run(async {
            let _ = stop_rx.await;
        }),
    );

    let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&echo.port().to_be_bytes());

    let mut client = UnixStream::connect(&path).await.unwrap();
    socks_connect(&mut client, &request).await;
    assert_echoes(&mut client).await;

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(!path.exists());
}
