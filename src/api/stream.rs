//! Purpose: Lazy, cancellable entity stream backed by a pagination task.
//! Exports: `EntityStream`.
//! Role: Consumer side of the lookup and query drivers in `api::pagination`.
//! Invariants: Entities are yielded in server order; an error ends the stream.
//! Invariants: `abort()` and `Drop` cancel the in-flight RPC and stop further rounds.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use super::pagination::{RunQueryInfo, StreamEvent};
use crate::core::error::Error;
use crate::core::value::Entity;

pub(crate) type EventSender = mpsc::Sender<Result<StreamEvent, Error>>;

pub struct EntityStream {
    events: ReceiverStream<Result<StreamEvent, Error>>,
    task: JoinHandle<()>,
    info: Option<RunQueryInfo>,
    done: bool,
}

impl EntityStream {
    pub(crate) fn spawn<F, Fut>(capacity: usize, driver: F) -> Self
    where
        F: FnOnce(EventSender) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(driver(tx));
        Self {
            events: ReceiverStream::new(rx),
            task,
            info: None,
            done: false,
        }
    }

    pub async fn next_entity(&mut self) -> Result<Option<Entity>, Error> {
        self.next().await.transpose()
    }

    /// Query completion info; populated once the stream has been exhausted.
    pub fn info(&self) -> Option<&RunQueryInfo> {
        self.info.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Stop the stream: the in-flight RPC is dropped and no further rounds are issued.
    pub fn abort(&mut self) {
        self.task.abort();
        self.events.close();
        self.done = true;
    }
}

impl Stream for EntityStream {
    type Item = Result<Entity, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match Pin::new(&mut this.events).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Ok(StreamEvent::Info(info)))) => {
                    this.info = Some(info);
                }
                Poll::Ready(Some(Ok(StreamEvent::Entity(entity)))) => {
                    return Poll::Ready(Some(Ok(entity)));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    this.task.abort();
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }
}

impl Drop for EntityStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
