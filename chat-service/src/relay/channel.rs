//! Push channel to the requesting client.
//!
//! The relay writes [`Frame`]s into a bounded mpsc channel; the HTTP handler
//! drains the receiving half into an SSE response. When the client goes away
//! axum drops the response body, which drops the receiver, which is how the
//! relay learns about the disconnect.

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One typed frame of the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Frame {
    Content(String),
    Done,
    Error(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("client channel closed")]
pub struct ChannelClosed;

/// Sending half of a client connection.
#[derive(Debug)]
pub struct ClientChannel {
    tx: mpsc::Sender<Frame>,
    closed: bool,
}

impl ClientChannel {
    /// Create a channel and the receiver the transport drains.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, closed: false }, rx)
    }

    /// Whether frames can still reach the client.
    pub fn is_open(&self) -> bool {
        !self.closed && !self.tx.is_closed()
    }

    /// Send one frame, waiting for buffer space if the client is slow.
    ///
    /// After the first failure the channel stays closed and every later send
    /// fails without touching the transport.
    pub async fn send(&mut self, frame: Frame) -> Result<(), ChannelClosed> {
        if self.closed {
            return Err(ChannelClosed);
        }
        if self.tx.send(frame).await.is_err() {
            self.closed = true;
            return Err(ChannelClosed);
        }
        Ok(())
    }

    /// Resolves once the client has disconnected.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Adapt the receiving half into SSE events with JSON `data:` payloads.
pub fn sse_events(rx: mpsc::Receiver<Frame>) -> impl Stream<Item = Result<Event, axum::Error>> {
    ReceiverStream::new(rx).map(|frame| Event::default().json_data(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_serialize_as_typed_objects() {
        assert_eq!(
            serde_json::to_string(&Frame::Content("Hel".into())).unwrap(),
            r#"{"type":"content","data":"Hel"}"#
        );
        assert_eq!(
            serde_json::to_string(&Frame::Done).unwrap(),
            r#"{"type":"done"}"#
        );
        assert_eq!(
            serde_json::to_string(&Frame::Error("boom".into())).unwrap(),
            r#"{"type":"error","data":"boom"}"#
        );
    }

    #[tokio::test]
    async fn dropping_the_receiver_closes_the_channel() {
        let (mut channel, rx) = ClientChannel::pair(4);
        assert!(channel.is_open());

        drop(rx);
        channel.closed().await;

        assert!(!channel.is_open());
        assert_eq!(channel.send(Frame::Done).await, Err(ChannelClosed));
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (mut channel, mut rx) = ClientChannel::pair(4);
        channel.send(Frame::Content("a".into())).await.unwrap();
        channel.send(Frame::Content("b".into())).await.unwrap();
        channel.send(Frame::Done).await.unwrap();

        assert_eq!(rx.recv().await, Some(Frame::Content("a".into())));
        assert_eq!(rx.recv().await, Some(Frame::Content("b".into())));
        assert_eq!(rx.recv().await, Some(Frame::Done));
    }
}
