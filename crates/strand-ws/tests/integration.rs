//! End-to-end tests over real sockets: boot a server, connect with a
//! WebSocket client, and exercise the full upgrade/session/teardown path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use strand_ws::{
    Frame, Message, OriginPolicy, ServerConfig, Session, SessionHandler, UpgradeGuard,
    UpgradeOutcome, UpgradeRejected, UpgradeRequest, WsServer,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message as WireMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const TIMEOUT: Duration = Duration::from_secs(5);

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Echoes every data message back to the peer.
struct Echo;

#[async_trait]
impl SessionHandler for Echo {
    async fn handle(&self, session: Arc<Session>) {
        while let Ok(msg) = session.recv().await {
            if session.send(msg).await.is_err() {
                break;
            }
        }
    }
}

/// Replies to each message with the bearer token it was stamped with.
struct TokenEcho;

#[async_trait]
impl SessionHandler for TokenEcho {
    async fn handle(&self, session: Arc<Session>) {
        while let Ok(msg) = session.recv().await {
            let token = msg.bearer_token().unwrap_or("anonymous").to_owned();
            if session
                .send(Message::from_frame(Frame::text(token)))
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

/// Never returns, even once the session is closing.
struct Stubborn;

#[async_trait]
impl SessionHandler for Stubborn {
    async fn handle(&self, _session: Arc<Session>) {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

/// Closes the session after the first message.
struct OneShot;

#[async_trait]
impl SessionHandler for OneShot {
    async fn handle(&self, session: Arc<Session>) {
        let _ = session.recv().await;
        session.close().await;
    }
}

async fn boot(config: ServerConfig, handler: Arc<dyn SessionHandler>) -> (String, WsServer) {
    boot_with(WsServer::new(config, handler)).await
}

async fn boot_with(mut server: WsServer) -> (String, WsServer) {
    let addr = server.local_addr().expect("listener bound");
    server.start().expect("server start");
    (format!("ws://{addr}/ws"), server)
}

fn localhost_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        ..ServerConfig::default()
    }
}

async fn connect(url: &str) -> ClientStream {
    let (ws, _response) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect deadline")
        .expect("websocket handshake");
    ws
}

/// Next data or close frame, skipping liveness traffic.
async fn read_frame(ws: &mut ClientStream) -> WireMessage {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read deadline")
            .expect("stream open")
            .expect("frame");
        match msg {
            WireMessage::Ping(_) | WireMessage::Pong(_) => {}
            other => return other,
        }
    }
}

#[tokio::test]
async fn echo_round_trip() {
    let (url, mut server) = boot(localhost_config(), Arc::new(Echo)).await;
    let mut ws = connect(&url).await;

    ws.send(WireMessage::text("hello")).await.unwrap();
    let reply = read_frame(&mut ws).await;
    assert_eq!(reply, WireMessage::text("hello"));

    ws.send(WireMessage::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = read_frame(&mut ws).await;
    assert_eq!(reply, WireMessage::binary(vec![1u8, 2, 3]));

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn messages_are_stamped_with_handshake_token() {
    let (url, mut server) = boot(localhost_config(), Arc::new(TokenEcho)).await;

    let mut request = url.clone().into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("x-token", "tok_abc".parse().unwrap());
    let (mut ws, _response) = timeout(TIMEOUT, connect_async(request))
        .await
        .expect("connect deadline")
        .expect("websocket handshake");

    ws.send(WireMessage::text("whoami")).await.unwrap();
    assert_eq!(read_frame(&mut ws).await, WireMessage::text("tok_abc"));

    // A second client without the header is stamped with nothing.
    let mut anon = connect(&url).await;
    anon.send(WireMessage::text("whoami")).await.unwrap();
    assert_eq!(read_frame(&mut anon).await, WireMessage::text("anonymous"));

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn guard_rejection_fails_the_handshake() {
    struct RequireToken;

    #[async_trait]
    impl UpgradeGuard for RequireToken {
        async fn authorize(
            &self,
            request: &UpgradeRequest,
        ) -> Result<UpgradeOutcome, UpgradeRejected> {
            match request.bearer_token() {
                Some(token) => Ok(UpgradeOutcome {
                    context: None,
                    bearer_token: Some(token),
                }),
                None => Err(UpgradeRejected::new("missing token")),
            }
        }
    }

    let server = WsServer::new(localhost_config(), Arc::new(Echo))
        .with_guard(Arc::new(RequireToken));
    let (url, mut server) = boot_with(server).await;

    let err = timeout(TIMEOUT, connect_async(&url))
        .await
        .expect("connect deadline")
        .expect_err("handshake must fail");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn origin_policy_veto_fails_the_handshake() {
    struct DenyAllOrigins;

    impl OriginPolicy for DenyAllOrigins {
        fn allow(&self, _request: &UpgradeRequest) -> bool {
            false
        }
    }

    let server = WsServer::new(localhost_config(), Arc::new(Echo))
        .with_origin_policy(Arc::new(DenyAllOrigins));
    let (url, mut server) = boot_with(server).await;

    let err = timeout(TIMEOUT, connect_async(&url))
        .await
        .expect("connect deadline")
        .expect_err("handshake must fail");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn slow_guard_times_out_the_handshake() {
    struct Stalls;

    #[async_trait]
    impl UpgradeGuard for Stalls {
        async fn authorize(
            &self,
            _request: &UpgradeRequest,
        ) -> Result<UpgradeOutcome, UpgradeRejected> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("authorization must be cut off by the deadline")
        }
    }

    let cfg = ServerConfig {
        handshake_timeout: Duration::from_millis(50),
        ..localhost_config()
    };
    let server = WsServer::new(cfg, Arc::new(Echo)).with_guard(Arc::new(Stalls));
    let (url, mut server) = boot_with(server).await;

    let err = timeout(TIMEOUT, connect_async(&url))
        .await
        .expect("connect deadline")
        .expect_err("handshake must fail");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 408);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn custom_path_is_routed() {
    let cfg = ServerConfig {
        path: "/realtime".into(),
        ..localhost_config()
    };
    let mut server = WsServer::new(cfg, Arc::new(Echo));
    let addr = server.local_addr().expect("listener bound");
    server.start().expect("server start");

    let mut ws = connect(&format!("ws://{addr}/realtime")).await;
    ws.send(WireMessage::text("routed")).await.unwrap();
    assert_eq!(read_frame(&mut ws).await, WireMessage::text("routed"));

    let err = timeout(TIMEOUT, connect_async(format!("ws://{addr}/ws")))
        .await
        .expect("connect deadline")
        .expect_err("default path must not exist");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn stop_is_deadline_bounded_despite_a_stuck_handler() {
    let (url, mut server) = boot(localhost_config(), Arc::new(Stubborn)).await;
    let _ws = connect(&url).await;
    // Let the serve task pick the connection up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    server.stop(Duration::from_millis(200)).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "stop must give up on handlers that ignore the close signal"
    );
}

#[tokio::test]
async fn handler_close_notifies_the_peer() {
    let (url, mut server) = boot(localhost_config(), Arc::new(OneShot)).await;
    let mut ws = connect(&url).await;

    ws.send(WireMessage::text("bye")).await.unwrap();
    match read_frame(&mut ws).await {
        WireMessage::Close(_) => {}
        other => panic!("expected close notification, got {other:?}"),
    }

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn server_emits_liveness_probes() {
    let cfg = ServerConfig {
        heartbeat_interval: Duration::from_millis(500),
        ..localhost_config()
    };
    let (url, mut server) = boot(cfg, Arc::new(Echo)).await;
    let mut ws = connect(&url).await;

    // The writer probes at 80% of the heartbeat interval.
    let deadline = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(WireMessage::Ping(_))) => break,
                Some(Ok(_)) => {}
                other => panic!("stream ended before a probe: {other:?}"),
            }
        }
    })
    .await;
    assert!(deadline.is_ok(), "no liveness probe within two seconds");

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn silent_peer_is_disconnected() {
    let cfg = ServerConfig {
        heartbeat_interval: Duration::from_millis(300),
        close_grace: Duration::from_millis(10),
        ..localhost_config()
    };
    let (url, mut server) = boot(cfg, Arc::new(Echo)).await;
    let mut ws = connect(&url).await;

    // Do not read (so probes are never answered) and do not write. The
    // monitor must conclude the peer is dead and close the connection.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let outcome = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(WireMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "connection not torn down after silence");

    server.stop(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn graceful_shutdown_closes_live_sessions() {
    let (url, mut server) = boot(localhost_config(), Arc::new(Echo)).await;
    let mut ws = connect(&url).await;

    // Prove the session is live, then stop the server underneath it.
    ws.send(WireMessage::text("ping")).await.unwrap();
    assert_eq!(read_frame(&mut ws).await, WireMessage::text("ping"));

    server.stop(TIMEOUT).await.unwrap();

    let outcome = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(WireMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "client not notified of shutdown");
}

#[tokio::test]
async fn sequential_connections_reuse_the_engine() {
    let (url, mut server) = boot(localhost_config(), Arc::new(OneShot)).await;

    for i in 0..3 {
        let mut ws = connect(&url).await;
        ws.send(WireMessage::text(format!("round {i}"))).await.unwrap();
        match read_frame(&mut ws).await {
            WireMessage::Close(_) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }

    server.stop(TIMEOUT).await.unwrap();
}
