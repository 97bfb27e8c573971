//! Upgrade orchestration and server lifecycle.
//!
//! [`WsServer`] binds its listener eagerly at construction (so auto-assigned
//! ports are observable before the serve loop runs), routes upgrade requests
//! through the origin policy and the pre-upgrade guard, and hands each
//! upgraded connection to a pooled [`Session`] driven by the installed
//! [`SessionHandler`]. A rejection at any checkpoint aborts the upgrade
//! before a session exists.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics::{counter, gauge, histogram};
use strand_core::{IdGenerator, UuidIds};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hooks::{
    AfterHook, AllowAll, CloseOnFinish, OriginPolicy, PermissiveOrigin, SessionHandler,
    UpgradeGuard, UpgradeOutcome, UpgradeRequest,
};
use crate::pool::SessionPool;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::axum_ws;

/// Shared state behind the upgrade route.
struct GatewayState {
    config: ServerConfig,
    pool: SessionPool,
    handler: Arc<dyn SessionHandler>,
    guard: Arc<dyn UpgradeGuard>,
    after: Arc<dyn AfterHook>,
    origin: Arc<dyn OriginPolicy>,
    shutdown: Arc<ShutdownCoordinator>,
}

/// Duplex WebSocket session server.
///
/// Construction binds the listener; [`WsServer::start`] launches the serve
/// loop on the current runtime and returns immediately.
pub struct WsServer {
    config: ServerConfig,
    handler: Arc<dyn SessionHandler>,
    guard: Arc<dyn UpgradeGuard>,
    after: Arc<dyn AfterHook>,
    origin: Arc<dyn OriginPolicy>,
    ids: Arc<dyn IdGenerator>,
    shutdown: Arc<ShutdownCoordinator>,
    bound: Option<io::Result<std::net::TcpListener>>,
    local_addr: Option<SocketAddr>,
    serve_task: Option<JoinHandle<Result<(), ServerError>>>,
}

impl WsServer {
    /// Bind the listener and assemble a server with default policies:
    /// permissive origin, admit-all guard, close-on-finish after hook, and
    /// UUID v7 session ids.
    ///
    /// A bind failure is held and reported by [`WsServer::start`], so
    /// constructing a server on a busy port does not panic.
    #[must_use]
    pub fn new(config: ServerConfig, handler: Arc<dyn SessionHandler>) -> Self {
        let addr = format!("{}:{}", config.host, config.port);
        let bound = std::net::TcpListener::bind(&addr).and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        });
        let local_addr = bound.as_ref().ok().and_then(|l| l.local_addr().ok());
        Self {
            config,
            handler,
            guard: Arc::new(AllowAll),
            after: Arc::new(CloseOnFinish),
            origin: Arc::new(PermissiveOrigin),
            ids: Arc::new(UuidIds),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            bound: Some(bound),
            local_addr,
            serve_task: None,
        }
    }

    /// Install a pre-upgrade authorization guard.
    #[must_use]
    pub fn with_guard(mut self, guard: Arc<dyn UpgradeGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Install a post-handler hook.
    #[must_use]
    pub fn with_after(mut self, after: Arc<dyn AfterHook>) -> Self {
        self.after = after;
        self
    }

    /// Install a connection-origin policy.
    #[must_use]
    pub fn with_origin_policy(mut self, origin: Arc<dyn OriginPolicy>) -> Self {
        self.origin = origin;
        self
    }

    /// Install a session identity generator.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Address the listener actually bound, once known. With `port: 0` this
    /// is the auto-assigned port.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The upgrade route as a standalone router, for embedding or for
    /// driving requests through it directly.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = Arc::new(GatewayState {
            config: self.config.clone(),
            pool: SessionPool::new(self.ids.clone()),
            handler: self.handler.clone(),
            guard: self.guard.clone(),
            after: self.after.clone(),
            origin: self.origin.clone(),
            shutdown: self.shutdown.clone(),
        });
        Router::new()
            .route(&self.config.path, get(upgrade))
            .with_state(state)
    }

    /// Launch the serve loop on the current runtime.
    ///
    /// Reports the deferred bind error, if construction hit one. Calling
    /// `start` twice is an error.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let listener = self
            .bound
            .take()
            .ok_or_else(|| ServerError::Serve(io::Error::other("server already started")))?
            .map_err(ServerError::Bind)?;
        let listener = tokio::net::TcpListener::from_std(listener).map_err(ServerError::Bind)?;
        let router = self.router();
        let token = self.shutdown.token();
        info!(
            addr = %listener.local_addr().map_or_else(|_| "unknown".into(), |a| a.to_string()),
            path = %self.config.path,
            "websocket server listening"
        );
        self.serve_task = Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
                .map_err(ServerError::Serve)
        }));
        Ok(())
    }

    /// Stop accepting upgrades, signal every live session's serve task, and
    /// wait up to `deadline` for them to drain.
    pub async fn stop(&mut self, deadline: Duration) -> Result<(), ServerError> {
        self.shutdown.drain(deadline).await;
        if let Some(task) = self.serve_task.take() {
            match task.await {
                Ok(res) => res?,
                Err(join_err) => return Err(ServerError::Serve(io::Error::other(join_err))),
            }
        }
        Ok(())
    }
}

async fn upgrade(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let request = UpgradeRequest { headers, uri };
    info!(
        path = %request.uri.path(),
        origin = ?request.origin(),
        "establishing websocket session"
    );
    counter!("ws_upgrade_attempts_total").increment(1);

    if !state.origin.allow(&request) {
        warn!(origin = ?request.origin(), "upgrade refused by origin policy");
        counter!("ws_upgrade_rejections_total").increment(1);
        return StatusCode::FORBIDDEN.into_response();
    }

    let outcome = match timeout(
        state.config.handshake_timeout,
        state.guard.authorize(&request),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(rejected)) => {
            warn!(reason = %rejected.reason, "upgrade rejected by guard");
            counter!("ws_upgrade_rejections_total").increment(1);
            return (StatusCode::UNAUTHORIZED, rejected.reason).into_response();
        }
        Err(_) => {
            warn!("upgrade authorization timed out");
            counter!("ws_upgrade_rejections_total").increment(1);
            return StatusCode::REQUEST_TIMEOUT.into_response();
        }
    };

    let mut ws = ws.write_buffer_size(state.config.write_buffer_size);
    if let Some(max) = state.config.max_message_size {
        ws = ws.max_message_size(max);
    }
    ws.on_upgrade(move |socket| {
        let tracker = state.shutdown.connections().clone();
        tracker.track_future(serve_session(state, socket, outcome))
    })
}

/// Drive one upgraded connection from session acquisition to pool release.
#[tracing::instrument(skip_all)]
async fn serve_session(state: Arc<GatewayState>, socket: WebSocket, outcome: UpgradeOutcome) {
    let (sink, source) = axum_ws::split(socket);
    let session = state
        .pool
        .acquire(sink, source, state.config.session(), outcome.bearer_token);
    if let Some(ctx) = outcome.context {
        session.set_context(ctx);
    }
    info!(session_id = %session.id(), "session started");
    counter!("ws_sessions_total").increment(1);
    gauge!("ws_sessions_active").increment(1.0);
    let started = Instant::now();

    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let handler = state.handler.clone();
    let app_session = session.clone();
    let _ = session.tracker().spawn(async move {
        handler.handle(app_session).await;
        let _ = done_tx.send(());
    });

    let shutdown_token = state.shutdown.token();
    tokio::select! {
        _ = &mut done_rx => {}
        () = shutdown_token.cancelled() => {
            debug!(session_id = %session.id(), "server shutting down, closing session");
            session.close().await;
            let _ = (&mut done_rx).await;
        }
    }

    state.after.on_finish(&session).await;
    let session_id = session.id().clone();
    state.pool.release(session).await;
    gauge!("ws_sessions_active").decrement(1.0);
    histogram!("ws_session_duration_seconds").record(started.elapsed().as_secs_f64());
    info!(session_id = %session_id, "session finished");
}
