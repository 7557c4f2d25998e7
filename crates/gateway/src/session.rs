// Connection Session
//
// Per-connection plumbing shared by the registrant and viewer servers: a
// writer task that owns the sink half of the socket and a read loop that
// feeds text frames to a handler.

use crate::error::GatewayError;
use crate::registry::ConnectionHandle;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{error::Elapsed, timeout};
use tokio_tungstenite::tungstenite::{self, Message};

/// How long to wait for the peer to finish the close handshake.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Receives text frames read from a connection.
#[async_trait]
pub trait TextFrames: Send + Sync {
    async fn on_text(&self, handle: &ConnectionHandle, text: &str);
}

/// Owns the sink half of a socket and writes queued frames in order.
///
/// Exits after writing a close frame, when `stop` fires, or when a write fails
/// or exceeds `send_timeout`. A failed write asks the read side to close too.
pub async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Message>,
    mut stop: oneshot::Receiver<()>,
    send_timeout: Duration,
    handle: ConnectionHandle,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let message = tokio::select! {
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = &mut stop => break,
        };

        let is_close = matches!(message, Message::Close(_));
        match timeout(send_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!("Write to {} failed: {}", handle.id, e);
                handle.request_close("write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    "Write to {} exceeded {:?}, closing connection",
                    handle.id,
                    send_timeout
                );
                handle.request_close("send timeout");
                break;
            }
        }
        if is_close {
            break;
        }
    }

    let _ = timeout(send_timeout, sink.close()).await;
}

async fn next_frame<S>(
    source: &mut S,
    idle: Option<Duration>,
) -> Result<Option<Result<Message, tungstenite::Error>>, Elapsed>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    match idle {
        Some(limit) => timeout(limit, source.next()).await,
        None => Ok(source.next().await),
    }
}

/// Keep reading until the peer completes the close handshake or the grace
/// period runs out. Reading is what flushes tungstenite's close reply.
async fn drain<S>(source: &mut S)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let _ = timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = source.next().await {}
    })
    .await;
}

/// Read frames until the connection ends.
///
/// Returns `Ok` for an orderly end (peer close, stream end, idle timeout, or
/// a close requested through the handle) and `Err` for transport failures.
pub async fn drive<S, F>(
    source: &mut S,
    handle: &ConnectionHandle,
    idle: Option<Duration>,
    frames: &F,
) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    F: TextFrames + ?Sized,
{
    loop {
        let next = tokio::select! {
            next = next_frame(source, idle) => next,
            _ = handle.close_requested() => {
                drain(source).await;
                return Ok(());
            }
        };

        match next {
            Err(_) => {
                tracing::info!("Connection {} idle, closing", handle.id);
                handle.request_close("idle timeout");
                drain(source).await;
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(message))) => match message {
                Message::Text(text) => frames.on_text(handle, text.as_str()).await,
                Message::Close(frame) => {
                    tracing::debug!("Connection {} sent close: {:?}", handle.id, frame);
                    handle.begin_closing();
                    drain(source).await;
                    return Ok(());
                }
                Message::Binary(_) => {
                    tracing::debug!("Ignoring binary frame from {}", handle.id);
                }
                // ping/pong are answered by tungstenite
                _ => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextFrames for Recorder {
        async fn on_text(&self, _handle: &ConnectionHandle, text: &str) {
            self.seen.lock().unwrap().push(text.to_string());
        }
    }

    fn handle() -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new("127.0.0.1:1".parse().unwrap(), tx), rx)
    }

    #[tokio::test]
    async fn test_drive_feeds_text_and_stops_at_close() {
        let (h, _rx) = handle();
        h.mark_open();
        let mut source = stream::iter(vec![
            Ok(Message::text("one")),
            Ok(Message::binary(vec![1, 2])),
            Ok(Message::text("two")),
            Ok(Message::Close(None)),
            Ok(Message::text("never")),
        ]);
        let recorder = Recorder::default();

        drive(&mut source, &h, None, &recorder).await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(h.state(), crate::registry::ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_drive_reports_transport_error() {
        let (h, _rx) = handle();
        let mut source = stream::iter(vec![Err(tungstenite::Error::ConnectionClosed)]);
        let err = drive(&mut source, &h, None, &Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_idle_timeout_requests_close() {
        let (h, mut rx) = handle();
        h.mark_open();
        let mut source = stream::pending::<Result<Message, tungstenite::Error>>();

        drive(
            &mut source,
            &h,
            Some(Duration::from_secs(5)),
            &Recorder::default(),
        )
        .await
        .unwrap();

        assert!(matches!(rx.recv().await, Some(Message::Close(Some(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_returns_on_close_request() {
        let (h, _rx) = handle();
        h.mark_open();
        h.request_close("shutdown");
        let mut source = stream::pending::<Result<Message, tungstenite::Error>>();

        drive(&mut source, &h, None, &Recorder::default())
            .await
            .unwrap();
    }
}
