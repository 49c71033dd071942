//! Infinite payload sources for sending without files

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::io::{AsyncRead, ReadBuf};

/// Endless stream of zero bytes
#[derive(Debug, Default)]
pub struct ZeroReader;

impl AsyncRead for ZeroReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = buf.remaining();
        buf.initialize_unfilled_to(n).fill(0);
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

/// Endless stream of pseudo-random bytes
#[derive(Debug)]
pub struct RandomReader {
    rng: StdRng,
}

impl RandomReader {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Reproducible stream, used by tests and benchmarks
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomReader {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for RandomReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = buf.remaining();
        this.rng.fill_bytes(buf.initialize_unfilled_to(n));
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}
