//! Per-connection session state machine and its three background tasks.
//!
//! A [`Session`] owns one framed duplex connection and two bounded queues.
//! Three tasks run for the lifetime of the connection:
//!
//! - **reader** — pulls frames off the wire under a per-receive deadline,
//!   stamps data frames with a fresh correlation context, and enqueues them
//!   for the application
//! - **writer** — drains the outbound queue under a per-write deadline and
//!   emits periodic liveness probes
//! - **monitor** — polls the activity timestamp and forces closure on silence
//!
//! All of them, plus any caller blocked in [`Session::recv`] /
//! [`Session::send`], observe a single broadcast-once cancellation signal.
//! The first close caller wins; every later call is a no-op.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use strand_core::{CorrelationContext, SessionId};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::message::{Frame, FrameKind, Message};
use crate::transport::{FrameSink, FrameSource, TransportError};

/// Coarse lifecycle state, derived from the closed flag and the cancellation
/// signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Reader/writer/monitor running, queues live.
    Open,
    /// The close sequence has started but cancellation has not fired yet.
    Closing,
    /// Cancellation has been broadcast; the connection is released.
    Closed,
}

/// Opaque application context attached by the pre-upgrade hook.
pub type AppContext = Arc<dyn Any + Send + Sync>;

/// One live duplex connection: identity, queues, liveness, cancellation.
pub struct Session {
    id: SessionId,
    bearer_token: Option<String>,
    app_context: parking_lot::Mutex<Option<AppContext>>,
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: AsyncMutex<mpsc::Receiver<Message>>,
    outbound_tx: mpsc::Sender<Message>,
    sink: Arc<AsyncMutex<Box<dyn FrameSink>>>,
    last_activity: parking_lot::Mutex<Instant>,
    cancel: CancellationToken,
    closed: AtomicBool,
    cfg: SessionConfig,
    tracker: TaskTracker,
}

impl Session {
    /// Build a session around a connection's sending half.
    ///
    /// Returns the session together with the outbound queue receiver, which
    /// [`Session::spawn_io`] hands to the writer task.
    pub(crate) fn build(
        sink: Box<dyn FrameSink>,
        cfg: SessionConfig,
        bearer_token: Option<String>,
        id: SessionId,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(cfg.inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(cfg.outbound_capacity);
        let session = Self {
            id,
            bearer_token,
            app_context: parking_lot::Mutex::new(None),
            inbound_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
            outbound_tx,
            sink: Arc::new(AsyncMutex::new(sink)),
            last_activity: parking_lot::Mutex::new(Instant::now()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            cfg,
            tracker: TaskTracker::new(),
        };
        (session, outbound_rx)
    }

    /// Overwrite every per-connection mutable field for reuse.
    ///
    /// Nothing from the prior use survives: fresh queues, fresh cancellation
    /// token, fresh task tracker, fresh liveness timestamp.
    pub(crate) fn reset(
        &mut self,
        sink: Box<dyn FrameSink>,
        cfg: SessionConfig,
        bearer_token: Option<String>,
        id: SessionId,
    ) -> mpsc::Receiver<Message> {
        let (fresh, outbound_rx) = Self::build(sink, cfg, bearer_token, id);
        *self = fresh;
        outbound_rx
    }

    /// Start the reader, writer, and liveness monitor on the session's task
    /// tracker.
    pub(crate) fn spawn_io(
        self: &Arc<Self>,
        source: Box<dyn FrameSource>,
        outbound_rx: mpsc::Receiver<Message>,
    ) {
        let _ = self.tracker.spawn(self.clone().read_loop(source));
        let _ = self.tracker.spawn(self.clone().write_loop(outbound_rx));
        let _ = self.tracker.spawn(self.clone().monitor_loop());
    }

    /// Tracker covering the three background tasks and the application task.
    ///
    /// The pool's release barrier waits on it before making the instance
    /// reusable.
    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Process-unique session identity.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Bearer token captured at upgrade time, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    /// Opaque application context, if one was attached.
    pub fn context(&self) -> Option<AppContext> {
        self.app_context.lock().clone()
    }

    /// Attach the opaque application context. Called once by the server with
    /// the pre-upgrade hook's result.
    pub fn set_context(&self, ctx: AppContext) {
        *self.app_context.lock() = Some(ctx);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Closed
        } else if self.closed.load(Ordering::SeqCst) {
            SessionState::Closing
        } else {
            SessionState::Open
        }
    }

    /// Receive the next inbound message in wire-arrival order.
    ///
    /// Blocks until a message is queued or the cancellation signal fires;
    /// cancellation yields [`SessionError::Closing`] instead of blocking on a
    /// finalized queue.
    pub async fn recv(&self) -> Result<Message, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closing);
        }
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            msg = rx.recv() => msg.ok_or(SessionError::Closing),
            () = self.cancel.cancelled() => Err(SessionError::Closing),
        }
    }

    /// Queue a message for the writer task.
    ///
    /// Blocks while the outbound queue is full; never drops the message and
    /// never faults while blocked. Cancellation yields
    /// [`SessionError::Closing`].
    pub async fn send(&self, msg: Message) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closing);
        }
        tokio::select! {
            biased;
            res = self.outbound_tx.send(msg) => res.map_err(|_| SessionError::Closing),
            () = self.cancel.cancelled() => Err(SessionError::Closing),
        }
    }

    /// Run the close sequence exactly once.
    ///
    /// First caller: best-effort close notification to the peer, wait the
    /// grace period, release the connection, broadcast cancellation. Every
    /// subsequent caller returns immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.id, "session closing");
        {
            let mut sink = self.sink.lock().await;
            let _ = timeout(self.cfg.write_deadline, sink.send_frame(Frame::close())).await;
            tokio::time::sleep(self.cfg.close_grace).await;
            sink.shutdown().await;
        }
        self.cancel.cancel();
        debug!(session_id = %self.id, "session closed");
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        match timeout(self.cfg.write_deadline, sink.send_frame(frame)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Reader task: per-receive deadline, correlation stamping, bounded
    /// enqueue racing cancellation.
    async fn read_loop(self: Arc<Self>, mut source: Box<dyn FrameSource>) {
        loop {
            let received = tokio::select! {
                r = timeout(self.cfg.heartbeat_interval, source.next_frame()) => r,
                () = self.cancel.cancelled() => {
                    debug!(session_id = %self.id, "reader exiting on cancellation");
                    return;
                }
            };
            let frame = match received {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => {
                    if e.is_normal_close() {
                        warn!(session_id = %self.id, "peer closed connection");
                    } else {
                        error!(session_id = %self.id, error = %e, "read failed");
                    }
                    self.close().await;
                    return;
                }
                Err(_) => {
                    error!(session_id = %self.id, "read deadline exceeded");
                    self.close().await;
                    return;
                }
            };

            self.touch();
            match frame.kind {
                // Protocol-level liveness traffic only refreshes the
                // activity timestamp.
                FrameKind::Ping | FrameKind::Pong => {}
                FrameKind::Close => {
                    warn!(session_id = %self.id, "peer sent close frame");
                    self.close().await;
                    return;
                }
                FrameKind::Text | FrameKind::Binary => {
                    let msg = Message::new(
                        frame,
                        CorrelationContext::new(self.bearer_token.clone()),
                    );
                    tokio::select! {
                        res = self.inbound_tx.send(msg) => {
                            if res.is_err() {
                                return;
                            }
                        }
                        () = self.cancel.cancelled() => {
                            debug!(session_id = %self.id, "reader exiting on cancellation");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Writer task: outbound drain, periodic liveness probes at 80% of the
    /// heartbeat interval.
    async fn write_loop(self: Arc<Self>, mut outbound_rx: mpsc::Receiver<Message>) {
        let mut probe = tokio::time::interval(self.cfg.probe_interval());
        // Skip the immediate first tick
        let _ = probe.tick().await;

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { return };
                    if let Err(e) = self.write_frame(msg.into_frame()).await {
                        error!(session_id = %self.id, error = %e, "write failed");
                        self.close().await;
                        return;
                    }
                }
                () = self.cancel.cancelled() => {
                    debug!(session_id = %self.id, "writer exiting on cancellation");
                    return;
                }
                _ = probe.tick() => {
                    if let Err(e) = self.write_frame(Frame::ping()).await {
                        error!(session_id = %self.id, error = %e, "liveness probe write failed");
                        self.close().await;
                        return;
                    }
                }
            }
        }
    }

    /// Liveness monitor: polls at 10% of the heartbeat interval and forces
    /// closure once silence exceeds the interval.
    async fn monitor_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.cfg.monitor_interval());
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.idle_for() > self.cfg.heartbeat_interval {
                        warn!(
                            session_id = %self.id,
                            idle_ms = u64::try_from(self.idle_for().as_millis()).unwrap_or(u64::MAX),
                            "liveness timeout, closing session"
                        );
                        self.close().await;
                        return;
                    }
                }
                () = self.cancel.cancelled() => {
                    return;
                }
            }
        }
    }
}
