//! Duplex real-time WebSocket session engine.
//!
//! One [`Session`] per upgraded connection, with three background tasks
//! (reader, writer, liveness monitor) bridging the socket to a pair of
//! bounded queues. Sessions are recycled through a [`SessionPool`] whose
//! release barrier only reclaims instances with no live tasks and no
//! outstanding references. [`WsServer`] orchestrates upgrades around
//! pluggable origin, authorization, and teardown hooks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use strand_ws::{Session, SessionHandler, ServerConfig, WsServer};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl SessionHandler for Echo {
//!     async fn handle(&self, session: Arc<Session>) {
//!         while let Ok(msg) = session.recv().await {
//!             if session.send(msg).await.is_err() {
//!                 break;
//!             }
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = WsServer::new(ServerConfig::default(), Arc::new(Echo));
//!     server.start().unwrap();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.stop(Duration::from_secs(5)).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod hooks;
pub mod message;
pub mod pool;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use config::{ServerConfig, SessionConfig};
pub use error::{ServerError, SessionError, UpgradeRejected};
pub use hooks::{
    AfterHook, AllowAll, CloseOnFinish, OriginPolicy, PermissiveOrigin, SessionHandler,
    UpgradeGuard, UpgradeOutcome, UpgradeRequest, TOKEN_HEADER,
};
pub use message::{Frame, FrameKind, Message};
pub use pool::SessionPool;
pub use server::WsServer;
pub use session::{AppContext, Session, SessionState};
pub use shutdown::ShutdownCoordinator;
pub use transport::{FrameSink, FrameSource, TransportError};
