//! Wire frames and the application-facing message envelope.

use bytes::Bytes;
use strand_core::{CorrelationContext, RequestId};

/// Frame types carried over the duplex connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 text payload.
    Text,
    /// Opaque binary payload.
    Binary,
    /// Liveness probe.
    Ping,
    /// Liveness probe response.
    Pong,
    /// Close notification.
    Close,
}

impl FrameKind {
    /// Whether this frame carries application data (as opposed to protocol
    /// control traffic).
    #[must_use]
    pub fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

/// The unit the transport sends and receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub kind: FrameKind,
    /// Payload bytes (empty for most control frames).
    pub payload: Bytes,
}

impl Frame {
    /// Text frame from a string.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Text,
            payload: Bytes::from(s.into()),
        }
    }

    /// Binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload: payload.into(),
        }
    }

    /// Empty ping probe.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            kind: FrameKind::Ping,
            payload: Bytes::new(),
        }
    }

    /// Empty pong response.
    #[must_use]
    pub fn pong() -> Self {
        Self {
            kind: FrameKind::Pong,
            payload: Bytes::new(),
        }
    }

    /// Close notification.
    #[must_use]
    pub fn close() -> Self {
        Self {
            kind: FrameKind::Close,
            payload: Bytes::new(),
        }
    }
}

/// Immutable unit delivered to (and accepted from) the application.
///
/// The session reader stamps every inbound data frame with a
/// [`CorrelationContext`] carrying a fresh request id and the session's
/// bearer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    frame: Frame,
    context: CorrelationContext,
}

impl Message {
    /// Wrap a frame with the given correlation context.
    #[must_use]
    pub fn new(frame: Frame, context: CorrelationContext) -> Self {
        Self { frame, context }
    }

    /// Outbound convenience: wrap a frame with a fresh, token-less context.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            frame,
            context: CorrelationContext::new(None),
        }
    }

    /// Frame type.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.frame.kind
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.frame.payload
    }

    /// Correlation context.
    #[must_use]
    pub fn context(&self) -> &CorrelationContext {
        &self.context
    }

    /// Request id from the correlation context.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.context.request_id
    }

    /// Bearer token from the correlation context, if any.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.context.bearer_token.as_deref()
    }

    /// The underlying wire frame.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Consume self and return the wire frame.
    #[must_use]
    pub fn into_frame(self) -> Frame {
        self.frame
    }
}
