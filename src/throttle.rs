//! Rate-limited reader and writer
//!
//! Bytes are accounted in one-second windows. When a window has moved more
//! bytes than the target rate allows, the next operation sleeps until the
//! window is back on schedule.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep, sleep_until};
use tracing::trace;

/// Length of one accounting window
pub const ACCOUNTING_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Throttle {
    /// Bytes per second, 0 = unlimited
    rate: u64,
    window_start: Option<Instant>,
    window_bytes: u64,
    pause: Option<Pin<Box<Sleep>>>,
}

impl Throttle {
    fn new(rate: u64) -> Self {
        Self {
            rate,
            window_start: None,
            window_bytes: 0,
            pause: None,
        }
    }

    /// Wait out any pause scheduled by the previous chunk
    fn poll_pause(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(pause) = self.pause.as_mut() {
            ready!(pause.as_mut().poll(cx));
            self.pause = None;
        }
        Poll::Ready(())
    }

    fn record(&mut self, n: usize) {
        if self.rate == 0 || n == 0 {
            return;
        }

        let now = Instant::now();
        let start = match self.window_start {
            Some(start) if now.duration_since(start) < ACCOUNTING_WINDOW => start,
            _ => {
                self.window_bytes = 0;
                self.window_start = Some(now);
                now
            }
        };

        self.window_bytes += n as u64;
        let due = start + Duration::from_secs_f64(self.window_bytes as f64 / self.rate as f64);
        if due > now {
            trace!("Throttle: {} bytes in window, pausing {:?}", self.window_bytes, due - now);
            self.pause = Some(Box::pin(sleep_until(due)));
        }
    }
}

/// Reader capped at an average number of bytes per second
#[derive(Debug)]
pub struct ThrottledReader<R> {
    inner: R,
    throttle: Throttle,
}

impl<R> ThrottledReader<R> {
    /// A `rate` of 0 passes reads straight through
    pub fn new(inner: R, rate: u64) -> Self {
        Self {
            inner,
            throttle: Throttle::new(rate),
        }
    }

    pub fn rate(&self) -> u64 {
        self.throttle.rate
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.throttle.poll_pause(cx));

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.throttle.record(buf.filled().len() - before);
        Poll::Ready(Ok(()))
    }
}

/// Writer capped at an average number of bytes per second
#[derive(Debug)]
pub struct ThrottledWriter<W> {
    inner: W,
    throttle: Throttle,
}

impl<W> ThrottledWriter<W> {
    /// A `rate` of 0 passes writes straight through
    pub fn new(inner: W, rate: u64) -> Self {
        Self {
            inner,
            throttle: Throttle::new(rate),
        }
    }

    pub fn rate(&self) -> u64 {
        self.throttle.rate
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ThrottledWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.throttle.poll_pause(cx));

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.throttle.record(n);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.throttle.poll_pause(cx));
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.throttle.poll_pause(cx));
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Rate limiting for loops that move chunks themselves rather than through
/// a reader or writer
#[derive(Debug)]
pub struct Pacer {
    throttle: Throttle,
}

impl Pacer {
    /// A `rate` of 0 never waits
    pub fn new(rate: u64) -> Self {
        Self {
            throttle: Throttle::new(rate),
        }
    }

    /// Account for `n` bytes and wait until the window is back on schedule
    pub async fn pace(&mut self, n: usize) {
        self.throttle.record(n);
        std::future::poll_fn(|cx| self.throttle.poll_pause(cx)).await;
    }
}
