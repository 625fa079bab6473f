//! Batch task SSE bridge
//!
//! Adapts one batch task into a `text/event-stream` byte stream: an
//! `init` snapshot first, then either the replayed final event (late
//! subscriber) or live events until the terminal one.

use super::task::{Attach, BatchTask, TaskEvent};
use crate::infrastructure::transcode::openai::sse_data;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Byte stream over a task's lifecycle. Every write is one UTF-8
/// `data: <json>\n\n` record; the stream closes after the terminal event.
pub fn task_sse_stream(task: Arc<BatchTask>) -> Pin<Box<dyn Stream<Item = Bytes> + Send>> {
    let (tx, rx) = mpsc::unbounded_channel();

    let (snapshot, attach) = task.attach();
    let _ = tx.send(sse_data(&TaskEvent::Init { snapshot }));

    match attach {
        Attach::Final(event) => {
            // Late subscriber: replay the terminal event and close.
            let _ = tx.send(sse_data(&event));
        }
        Attach::Live(mut subscription) => {
            tokio::spawn(async move {
                while let Some(event) = subscription.receiver.recv().await {
                    let terminal = event.is_terminal();
                    if tx.send(sse_data(&event)).is_err() {
                        // Client went away; detach without touching the task.
                        break;
                    }
                    if terminal {
                        break;
                    }
                }
                task.unsubscribe(subscription.id);
            });
        }
    }

    Box::pin(UnboundedReceiverStream::new(rx))
}
