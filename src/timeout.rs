//! Readers that turn time into end-of-stream
//!
//! [`TimeoutReader`] ends a transfer after a period without data, which is
//! how a receiver notices that a sender without framing has finished.
//! [`DeadlineReader`] bounds an infinite payload source to a fixed duration.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep, sleep, sleep_until};
use tracing::debug;

/// Reader that reports end-of-stream once no data arrived for `timeout`.
///
/// Expiry is permanent: every later read also returns zero bytes.
#[derive(Debug)]
pub struct TimeoutReader<R> {
    inner: R,
    timeout: Duration,
    timer: Pin<Box<Sleep>>,
    armed: bool,
    expired: bool,
    first_read: Option<Instant>,
    last_read: Option<Instant>,
}

impl<R> TimeoutReader<R> {
    /// A zero `timeout` disables expiry
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            timer: Box::pin(sleep(timeout)),
            armed: false,
            expired: false,
            first_read: None,
            last_read: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    /// When the first byte arrived
    pub fn first_read(&self) -> Option<Instant> {
        self.first_read
    }

    /// When the most recent byte arrived
    pub fn last_read(&self) -> Option<Instant> {
        self.last_read
    }

    /// Time between the first and last byte, excluding the idle tail
    pub fn transfer_duration(&self) -> Duration {
        match (self.first_read, self.last_read) {
            (Some(first), Some(last)) => last.duration_since(first),
            _ => Duration::ZERO,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TimeoutReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.expired {
            return Poll::Ready(Ok(()));
        }

        if !this.armed && !this.timeout.is_zero() {
            this.timer.as_mut().reset(Instant::now() + this.timeout);
            this.armed = true;
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.armed = false;
                if result.is_ok() && buf.filled().len() > before {
                    let now = Instant::now();
                    this.first_read.get_or_insert(now);
                    this.last_read = Some(now);
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.armed && this.timer.as_mut().poll(cx).is_ready() {
                    debug!("No data for {:?}, ending stream", this.timeout);
                    this.armed = false;
                    this.expired = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending
            }
        }
    }
}

/// Reader that reports end-of-stream once a fixed deadline has passed.
///
/// The deadline is computed when the reader is created.
#[derive(Debug)]
pub struct DeadlineReader<R> {
    inner: R,
    deadline: Instant,
    timer: Pin<Box<Sleep>>,
}

impl<R> DeadlineReader<R> {
    pub fn new(inner: R, duration: Duration) -> Self {
        let deadline = Instant::now() + duration;
        Self {
            inner,
            deadline,
            timer: Box::pin(sleep_until(deadline)),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DeadlineReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.timer.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Ok(()));
        }

        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        Poll::Ready(Ok(()))
    }
}
