//! The framed-connection seam the session engine runs over.
//!
//! Sessions never touch a socket directly; they drive a [`FrameSource`] /
//! [`FrameSink`] pair. Production code gets the pair by splitting an axum
//! `WebSocket` via [`axum_ws::split`]; tests substitute channel-backed fakes.
//! Read and write deadlines are applied by the session with
//! `tokio::time::timeout` around the calls, so implementations stay
//! deadline-free.

use async_trait::async_trait;

use crate::message::{Frame, FrameKind};

/// Failure modes of the underlying connection.
///
/// The variants matter for logging severity during teardown: a deadline
/// expiry and an abnormal peer close are errors, a normal peer close is not.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The read or write deadline expired.
    #[error("transport deadline exceeded")]
    Timeout,
    /// The peer closed the connection cleanly.
    #[error("peer closed connection")]
    ClosedNormally,
    /// The connection ended without a close handshake.
    #[error("connection closed abnormally: {0}")]
    ClosedAbnormally(String),
    /// Any other I/O failure.
    #[error("transport i/o error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this error represents a clean peer-initiated close.
    #[must_use]
    pub fn is_normal_close(&self) -> bool {
        matches!(self, Self::ClosedNormally)
    }
}

/// Receiving half of a framed duplex connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame, blocking until one arrives or the connection
    /// fails.
    async fn next_frame(&mut self) -> Result<Frame, TransportError>;
}

/// Sending half of a framed duplex connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Release the underlying connection. Best-effort; errors are ignored by
    /// callers.
    async fn shutdown(&mut self);
}

/// Adapter from an axum `WebSocket` to the frame traits.
pub mod axum_ws {
    use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
    use futures::stream::{SplitSink, SplitStream};
    use futures::{SinkExt, StreamExt};

    use super::{Frame, FrameKind, FrameSink, FrameSource, TransportError, async_trait};

    /// Split a negotiated WebSocket into the engine's sink/source pair.
    #[must_use]
    pub fn split(ws: WebSocket) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let (tx, rx) = ws.split();
        (
            Box::new(WsSink { inner: tx }),
            Box::new(WsSource {
                inner: rx,
                peer_closed: false,
            }),
        )
    }

    struct WsSource {
        inner: SplitStream<WebSocket>,
        peer_closed: bool,
    }

    #[async_trait]
    impl FrameSource for WsSource {
        async fn next_frame(&mut self) -> Result<Frame, TransportError> {
            match self.inner.next().await {
                Some(Ok(WsMessage::Close(_))) => {
                    self.peer_closed = true;
                    Ok(Frame::close())
                }
                Some(Ok(msg)) => Ok(from_ws(msg)),
                Some(Err(e)) => Err(TransportError::Io(e.to_string())),
                None if self.peer_closed => Err(TransportError::ClosedNormally),
                None => Err(TransportError::ClosedAbnormally(
                    "stream ended without close handshake".into(),
                )),
            }
        }
    }

    struct WsSink {
        inner: SplitSink<WebSocket, WsMessage>,
    }

    #[async_trait]
    impl FrameSink for WsSink {
        async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.inner
                .send(to_ws(frame))
                .await
                .map_err(|e| TransportError::Io(e.to_string()))
        }

        async fn shutdown(&mut self) {
            let _ = self.inner.close().await;
        }
    }

    fn from_ws(msg: WsMessage) -> Frame {
        match msg {
            WsMessage::Text(t) => Frame::text(t.as_str()),
            WsMessage::Binary(b) => Frame::binary(b),
            WsMessage::Ping(p) => Frame {
                kind: FrameKind::Ping,
                payload: p,
            },
            WsMessage::Pong(p) => Frame {
                kind: FrameKind::Pong,
                payload: p,
            },
            WsMessage::Close(_) => Frame::close(),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn close_frame_maps_to_normal_close_notification() {
            match to_ws(Frame::close()) {
                WsMessage::Close(Some(cf)) => assert_eq!(cf.code, close_code::NORMAL),
                other => panic!("unexpected mapping: {other:?}"),
            }
        }

        #[test]
        fn data_frames_map_symmetrically() {
            assert_eq!(from_ws(to_ws(Frame::text("hi"))), Frame::text("hi"));
            assert_eq!(
                from_ws(to_ws(Frame::binary(vec![0, 1]))),
                Frame::binary(vec![0, 1])
            );
        }
    }

    fn to_ws(frame: Frame) -> WsMessage {
        match frame.kind {
            FrameKind::Text => {
                WsMessage::Text(String::from_utf8_lossy(&frame.payload).into_owned().into())
            }
            FrameKind::Binary => WsMessage::Binary(frame.payload),
            FrameKind::Ping => WsMessage::Ping(frame.payload),
            FrameKind::Pong => WsMessage::Pong(frame.payload),
            FrameKind::Close => WsMessage::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "server closed".into(),
            })),
        }
    }
}

/// Channel-backed transport for tests and in-process loops.
pub mod channel {
    use tokio::sync::mpsc;

    use super::{Frame, FrameSink, FrameSource, TransportError, async_trait};

    /// Build a connected sink/source pair plus the far ends.
    ///
    /// Frames pushed into the returned `peer_tx` arrive at the source; frames
    /// the engine writes appear on `peer_rx`. Dropping `peer_tx` reads as an
    /// abnormal close.
    #[must_use]
    pub fn pair(
        capacity: usize,
    ) -> (
        Box<dyn FrameSink>,
        Box<dyn FrameSource>,
        mpsc::Sender<Frame>,
        mpsc::Receiver<Frame>,
    ) {
        let (peer_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, peer_rx) = mpsc::channel(capacity);
        (
            Box::new(ChannelSink { tx: out_tx }),
            Box::new(ChannelSource { rx: in_rx }),
            peer_tx,
            peer_rx,
        )
    }

    struct ChannelSource {
        rx: mpsc::Receiver<Frame>,
    }

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next_frame(&mut self) -> Result<Frame, TransportError> {
            self.rx
                .recv()
                .await
                .ok_or_else(|| TransportError::ClosedAbnormally("peer end dropped".into()))
        }
    }

    struct ChannelSink {
        tx: mpsc::Sender<Frame>,
    }

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.tx
                .send(frame)
                .await
                .map_err(|_| TransportError::Io("peer receiver dropped".into()))
        }

        async fn shutdown(&mut self) {}
    }
}
