//! Stream wrapper that reports activity and honours close and read timeouts.
//!
//! Every successful read or write calls [`Tracked::mark_active`]. Once the
//! tracked state is closed, pending and future I/O fails with
//! `ConnectionAborted`. An optional per-read timeout fails a read that waited
//! longer than the limit without receiving data.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use crate::net::connection::Tracked;

type ClosedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct ActivityStream<S, T> {
    inner: S,
    tracked: Arc<T>,
    read_timeout: Option<Duration>,
    read_deadline: Option<Pin<Box<Sleep>>>,
    closed: Option<ClosedFuture>,
}

impl<S, T: Tracked> ActivityStream<S, T> {
    pub fn new(inner: S, tracked: Arc<T>) -> Self {
        let mut rx = tracked.close_signal().subscribe();
        let closed: ClosedFuture = Box::pin(async move {
            let _ = rx.wait_for(|closed| *closed).await;
        });
        Self {
            inner,
            tracked,
            read_timeout: None,
            read_deadline: None,
            closed: Some(closed),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Polls the close signal; `true` once the connection is closed.
    fn poll_closed(&mut self, cx: &mut Context<'_>) -> bool {
        if self.tracked.is_closed() {
            return true;
        }
        match self.closed.as_mut() {
            Some(closed) => {
                if closed.as_mut().poll(cx).is_ready() {
                    self.closed = None;
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

impl<S, T> AsyncRead for ActivityStream<S, T>
where
    S: AsyncRead + Unpin,
    T: Tracked,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.tracked.is_closed() {
            return Poll::Ready(Err(aborted()));
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_deadline = None;
                if result.is_ok() && buf.filled().len() > before {
                    this.tracked.mark_active();
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.poll_closed(cx) {
                    return Poll::Ready(Err(aborted()));
                }
                if let Some(timeout) = this.read_timeout {
                    let deadline = this
                        .read_deadline
                        .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                    if deadline.as_mut().poll(cx).is_ready() {
                        this.read_deadline = None;
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no data received within {timeout:?}"),
                        )));
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<S, T> AsyncWrite for ActivityStream<S, T>
where
    S: AsyncWrite + Unpin,
    T: Tracked,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.tracked.is_closed() {
            return Poll::Ready(Err(aborted()));
        }

        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => {
                if written > 0 {
                    this.tracked.mark_active();
                }
                Poll::Ready(Ok(written))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => {
                if this.poll_closed(cx) {
                    return Poll::Ready(Err(aborted()));
                }
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
