//! Reuse store for session instances.
//!
//! `acquire` hands out a reset instance (fresh queues, fresh identity, fresh
//! liveness timestamp) and starts its background tasks. `release` is the
//! reuse-safety barrier: an instance re-enters the free list only after the
//! reader, writer, monitor, and application task have all observably exited
//! *and* no other reference to it remains. A session whose handler still
//! holds a clone is dropped instead of pooled, so stale references can never
//! alias a recycled instance.

use std::sync::Arc;

use strand_core::{IdGenerator, UuidIds};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SessionConfig;
use crate::message::Message;
use crate::session::Session;
use crate::transport::{FrameSink, FrameSource};

/// Pool of reusable [`Session`] instances.
pub struct SessionPool {
    free: parking_lot::Mutex<Vec<Session>>,
    ids: Arc<dyn IdGenerator>,
}

impl SessionPool {
    /// Pool with the given identity generator.
    #[must_use]
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            free: parking_lot::Mutex::new(Vec::new()),
            ids,
        }
    }

    /// Pool minting UUID v7 session ids.
    #[must_use]
    pub fn with_default_ids() -> Self {
        Self::new(Arc::new(UuidIds))
    }

    /// Hand out a session for a freshly upgraded connection and start its
    /// reader, writer, and liveness monitor.
    ///
    /// A previously released instance is reset and reused when available;
    /// otherwise a new one is allocated.
    pub fn acquire(
        &self,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
        cfg: SessionConfig,
        bearer_token: Option<String>,
    ) -> Arc<Session> {
        let id = self.ids.session_id();
        let (session, outbound_rx): (Session, mpsc::Receiver<Message>) =
            match self.free.lock().pop() {
                Some(mut recycled) => {
                    let rx = recycled.reset(sink, cfg, bearer_token, id);
                    (recycled, rx)
                }
                None => Session::build(sink, cfg, bearer_token, id),
            };
        let session = Arc::new(session);
        session.spawn_io(source, outbound_rx);
        session
    }

    /// Return a session once its use is over.
    ///
    /// Waits on the session's task tracker until the three background tasks
    /// and the application task have all exited, then reclaims the instance
    /// if this was the last reference to it.
    pub async fn release(&self, session: Arc<Session>) {
        let _ = session.tracker().close();
        session.tracker().wait().await;
        match Arc::into_inner(session) {
            Some(quiesced) => {
                let mut free = self.free.lock();
                free.push(quiesced);
                debug!(idle = free.len(), "session returned to pool");
            }
            None => {
                // Someone still holds a clone; dropping their Arc will free
                // the instance without it ever re-entering circulation.
                debug!("session still referenced at release, not pooled");
            }
        }
    }

    /// Number of idle instances currently available for reuse.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}
