//! Per-message correlation metadata.

use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// Metadata attached to every inbound message by the session reader.
///
/// Carries a fresh request id (minted per message) and the bearer token the
/// session captured at upgrade time, so consumers can correlate and authorize
/// work without reaching back into the connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// Fresh id for this message.
    pub request_id: RequestId,
    /// Bearer token presented by the peer at upgrade time, if any.
    pub bearer_token: Option<String>,
}

impl CorrelationContext {
    /// Build a context with a freshly minted request id.
    #[must_use]
    pub fn new(bearer_token: Option<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            bearer_token,
        }
    }
}
