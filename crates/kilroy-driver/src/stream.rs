use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use kilroy_core::runner::RunnerEvent;
use tokio::sync::{broadcast, mpsc};

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Runner events seen by one subscriber, in the order the session emitted them.
///
/// A background task forwards from the session's broadcast channel into a
/// private mpsc channel. The stream ends when the session shuts down.
/// Dropping the stream stops the forwarder on its next send.
pub struct EventStream {
    rx: mpsc::Receiver<RunnerEvent>,
}

impl EventStream {
    pub(crate) fn new(mut source: broadcast::Receiver<RunnerEvent>) -> Self {
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break; // Subscriber dropped
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        EventStream { rx }
    }
}

impl Stream for EventStream {
    type Item = RunnerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
