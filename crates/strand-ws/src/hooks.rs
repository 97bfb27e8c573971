//! Pluggable policy seams around session establishment and teardown.
//!
//! All defaults are overridable on the server builder:
//!
//! - [`PermissiveOrigin`] accepts any origin (the upgrade route itself only
//!   matches GET) — integrators exposed to browsers should install a real
//!   policy
//! - [`AllowAll`] admits every upgrade and lifts the bearer token from the
//!   `x-token` header
//! - [`CloseOnFinish`] closes the session once the application task returns

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Uri};

use crate::error::UpgradeRejected;
use crate::session::{AppContext, Session};

/// Header the default guard reads the bearer token from.
pub const TOKEN_HEADER: &str = "x-token";

/// The parts of an upgrade request exposed to policies and guards.
#[derive(Debug)]
pub struct UpgradeRequest {
    /// Request headers.
    pub headers: HeaderMap,
    /// Request URI (path and query).
    pub uri: Uri,
}

impl UpgradeRequest {
    /// Bearer token from the `x-token` header, if present and valid UTF-8.
    #[must_use]
    pub fn bearer_token(&self) -> Option<String> {
        self.headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// The `Origin` header, if present and valid UTF-8.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.headers.get("origin").and_then(|v| v.to_str().ok())
    }
}

/// Connection-origin acceptance policy, consulted before the upgrade.
pub trait OriginPolicy: Send + Sync {
    /// Whether the request's origin is acceptable.
    fn allow(&self, request: &UpgradeRequest) -> bool;
}

/// Default policy: accept any origin.
///
/// Deliberately permissive, mirroring a server-to-server default. Browsers
/// can connect cross-origin under this policy; install a restrictive
/// [`OriginPolicy`] when that matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveOrigin;

impl OriginPolicy for PermissiveOrigin {
    fn allow(&self, _request: &UpgradeRequest) -> bool {
        true
    }
}

/// Outcome of a successful pre-upgrade authorization.
pub struct UpgradeOutcome {
    /// Opaque context to attach to the session, if any.
    pub context: Option<AppContext>,
    /// Bearer token to stamp into every inbound message's correlation
    /// context.
    pub bearer_token: Option<String>,
}

/// Pre-upgrade authorization hook.
///
/// Runs before any session is created; a rejection short-circuits the
/// upgrade and the application handler is never invoked.
#[async_trait]
pub trait UpgradeGuard: Send + Sync {
    /// Authorize the upgrade, producing the session's initial context.
    async fn authorize(&self, request: &UpgradeRequest)
    -> Result<UpgradeOutcome, UpgradeRejected>;
}

/// Default guard: admit everyone, passing the `x-token` header through.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl UpgradeGuard for AllowAll {
    async fn authorize(
        &self,
        request: &UpgradeRequest,
    ) -> Result<UpgradeOutcome, UpgradeRejected> {
        Ok(UpgradeOutcome {
            context: None,
            bearer_token: request.bearer_token(),
        })
    }
}

/// Per-connection application task.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Drive the session until the application is done with it.
    async fn handle(&self, session: Arc<Session>);
}

/// Post-handler hook, run after the application task signals completion.
#[async_trait]
pub trait AfterHook: Send + Sync {
    /// React to the application task finishing.
    async fn on_finish(&self, session: &Session);
}

/// Default post-handler hook: close the session.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloseOnFinish;

#[async_trait]
impl AfterHook for CloseOnFinish {
    async fn on_finish(&self, session: &Session) {
        session.close().await;
    }
}
