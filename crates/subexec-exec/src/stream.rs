//! Pull-based live output of a running attempt.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ExecError;

/// Capacity of the event channel between the driver task and the consumer.
pub(crate) const STREAM_BUFFER: usize = 64;

/// One item of live output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A stdout line, without its trailing newline.
    Stdout(String),
    /// A non-informational stderr line, without its trailing newline.
    Stderr(String),
    /// The process exited with code 0. Always the last item on success.
    Exited { exit_code: i32 },
}

pub(crate) type EventTx = mpsc::Sender<Result<StreamEvent, ExecError>>;

/// Live stdout/stderr of a subprocess.
///
/// Yields output lines while the process runs and ends with exactly one
/// terminal item: `Ok(StreamEvent::Exited { .. })` on success, or `Err` for a
/// nonzero exit or a timeout. The stream returns `None` afterwards.
#[derive(Debug)]
pub struct ExecutionStream {
    inner: ReceiverStream<Result<StreamEvent, ExecError>>,
}

impl ExecutionStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<StreamEvent, ExecError>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }
}

impl Stream for ExecutionStream {
    type Item = Result<StreamEvent, ExecError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;

    #[tokio::test]
    async fn forwards_items_in_order_then_ends() {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut stream = ExecutionStream::new(rx);

        tx.send(Ok(StreamEvent::Stdout("a".into()))).await.unwrap();
        tx.send(Ok(StreamEvent::Exited { exit_code: 0 }))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Stdout("a".into())
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Exited { exit_code: 0 }
        );
        assert!(stream.next().await.is_none());
    }
}
