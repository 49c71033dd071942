//! Moving bytes and messages between a payload and a connection
//!
//! Every pass feeds a [`Hasher`] so both sides can compare digests. End of
//! stream in any of its forms (EOF, inactivity timeout, a peer that hung up)
//! finishes a pass normally; only genuine I/O failures are returned.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::digest::Hasher;
use crate::error::is_end_of_stream;
use crate::framing::{FrameBoundary, FrameSplitter};
use crate::throttle::Pacer;

/// Chunks buffered between the serial read loop and the idle watcher
const CHUNK_QUEUE: usize = 16;

/// Prints received bytes, making control characters visible
#[derive(Debug)]
pub struct ConsoleEcho {
    stdout: tokio::io::Stdout,
    ended_with_newline: bool,
}

impl ConsoleEcho {
    pub fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
            ended_with_newline: true,
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.stdout.write_all(printable(data).as_bytes()).await?;
        self.stdout.flush().await?;
        self.ended_with_newline = data.ends_with(b"\n");
        Ok(())
    }

    /// Terminate the last line so log output starts on a fresh one
    pub async fn finish(&mut self) -> io::Result<()> {
        if !self.ended_with_newline {
            self.stdout.write_all(b"\n").await?;
            self.stdout.flush().await?;
            self.ended_with_newline = true;
        }
        Ok(())
    }
}

impl Default for ConsoleEcho {
    fn default() -> Self {
        Self::new()
    }
}

/// Render bytes for the console; line breaks and tabs pass through
pub fn printable(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\n' | b'\r' | b'\t' | 0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("<{:02x}>", b)),
        }
    }
    out
}

/// Destination of received bytes: digest, optional file, optional echo
#[derive(Debug)]
pub struct Sink {
    hasher: Hasher,
    file: Option<BufWriter<File>>,
    echo: Option<ConsoleEcho>,
    bytes: u64,
}

impl Sink {
    pub fn new(hasher: Hasher) -> Self {
        Self {
            hasher,
            file: None,
            echo: None,
            bytes: 0,
        }
    }

    /// Also write into `path`, keeping a previous file as `<path>.bak`
    pub async fn with_file(mut self, path: &Path) -> io::Result<Self> {
        backup_file(path).await?;
        info!("Writing received bytes to {}", path.display());
        self.file = Some(BufWriter::new(File::create(path).await?));
        Ok(self)
    }

    pub fn with_echo(mut self) -> Self {
        self.echo = Some(ConsoleEcho::new());
        self
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
        if let Some(file) = self.file.as_mut() {
            file.write_all(data).await?;
        }
        if let Some(echo) = self.echo.as_mut() {
            echo.write(data).await?;
        }
        Ok(())
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Flush outputs and return the hex digest of everything written
    pub async fn finish(mut self) -> io::Result<String> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        if let Some(echo) = self.echo.as_mut() {
            echo.finish().await?;
        }
        Ok(self.hasher.finalize_reset())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Rename an existing file to `<path>.bak`, replacing an older backup
pub async fn backup_file(path: &Path) -> io::Result<()> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(());
    }

    let backup = backup_path(path);
    debug!("Backing up {} to {}", path.display(), backup.display());
    if tokio::fs::try_exists(&backup).await? {
        tokio::fs::remove_file(&backup).await?;
    }
    tokio::fs::rename(path, &backup).await
}

/// Copy `source` into `writer` until the source ends or the peer goes away.
///
/// Returns the number of bytes accepted by the writer.
pub async fn send_stream<R, W>(
    source: &mut R,
    writer: &mut W,
    hasher: &mut Hasher,
    buffer_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if is_end_of_stream(&e) => break,
            Err(e) => return Err(e),
        };

        match writer.write_all(&buf[..n]).await {
            Ok(()) => {}
            Err(e) if is_end_of_stream(&e) => {
                debug!("Peer stopped reading: {}", e);
                return Ok(total);
            }
            Err(e) => return Err(e),
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    match writer.flush().await {
        Err(e) if !is_end_of_stream(&e) => Err(e),
        _ => Ok(total),
    }
}

/// Drain `reader` into `sink` until end of stream
pub async fn receive_stream<R>(reader: &mut R, sink: &mut Sink, buffer_size: usize) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if is_end_of_stream(&e) => {
                debug!("Stream ended: {}", e);
                break;
            }
            Err(e) => return Err(e),
        };
        sink.write(&buf[..n]).await?;
        total += n as u64;
    }

    Ok(total)
}

/// Receive from a link without connection semantics, such as a serial line.
///
/// Waits for the first chunk without limit, then ends the transfer once no
/// data arrived for `idle`. The read loop hands chunks to the idle watcher,
/// which owns the sink and the byte count; the watcher stops the read loop
/// through a watch channel when it gives up. A non-zero `rate` paces the
/// watcher, never the read loop, so the idle timer only sees line silence.
/// Returns the byte count and the time between the first and last chunk.
pub async fn receive_until_idle<R>(
    reader: &mut R,
    sink: &mut Sink,
    idle: Duration,
    buffer_size: usize,
    rate: u64,
) -> io::Result<(u64, Duration)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Bytes>(CHUNK_QUEUE);
    let buffer_size = buffer_size.max(1);

    let read_loop = async move {
        let mut buf = BytesMut::with_capacity(buffer_size);
        loop {
            buf.reserve(buffer_size);
            tokio::select! {
                _ = stop_rx.changed() => return Ok(()),
                result = reader.read_buf(&mut buf) => match result {
                    Ok(0) => return Ok(()),
                    Ok(_) => {
                        if chunk_tx.send(buf.split().freeze()).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) if is_end_of_stream(&e) => return Ok(()),
                    Err(e) => return Err(e),
                },
            }
        }
    };

    let idle_watch = async move {
        let mut total = 0u64;
        let mut first: Option<Instant> = None;
        let mut last: Option<Instant> = None;
        let mut pacer = Pacer::new(rate);
        let timer = sleep(idle);
        tokio::pin!(timer);

        let result = loop {
            tokio::select! {
                _ = &mut timer, if first.is_some() && !idle.is_zero() => {
                    debug!("No data for {:?}, assuming disconnect", idle);
                    break Ok(());
                }
                chunk = chunk_rx.recv() => {
                    let Some(chunk) = chunk else {
                        break Ok(());
                    };
                    let now = Instant::now();
                    first.get_or_insert(now);
                    last = Some(now);
                    total += chunk.len() as u64;
                    if let Err(e) = sink.write(&chunk).await {
                        break Err(e);
                    }
                    pacer.pace(chunk.len()).await;
                    timer.as_mut().reset(Instant::now() + idle);
                }
            }
        };

        // The read loop may be parked in a read that never completes
        let _ = stop_tx.send(true);

        let duration = match (first, last) {
            (Some(first), Some(last)) => last.duration_since(first),
            _ => Duration::ZERO,
        };
        result.map(|()| (total, duration))
    };

    let (read_result, idle_result) = tokio::join!(read_loop, idle_watch);
    let received = idle_result?;
    read_result?;
    Ok(received)
}

/// Send each payload as one frame
pub async fn send_messages<W>(
    writer: &mut W,
    boundary: &FrameBoundary,
    payloads: Vec<Bytes>,
    hasher: &mut Hasher,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, FrameSplitter::new(boundary.clone()));
    let mut sent = 0u64;

    for payload in payloads {
        debug!("Sending message of {} bytes", payload.len());
        hasher.update(&payload);
        framed.send(payload).await?;
        sent += 1;
    }

    Ok(sent)
}

/// File name for a received message
pub fn message_filename() -> String {
    format!(
        "message-{}.msg",
        chrono::Local::now().format("%Y%m%d-%H%M%S%.3f")
    )
}

async fn unique_message_path(dir: &Path) -> io::Result<PathBuf> {
    let name = message_filename();
    let path = dir.join(&name);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(path);
    }

    let stem = name.trim_end_matches(".msg");
    let mut index = 1;
    loop {
        let path = dir.join(format!("{}-{}.msg", stem, index));
        if !tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }
        index += 1;
    }
}

/// Split `reader` into messages until end of stream.
///
/// Every payload goes through `sink`; with `dir` set it is also stored as a
/// `message-<timestamp>.msg` file. Returns the number of messages.
pub async fn receive_messages<R>(
    reader: &mut R,
    boundary: &FrameBoundary,
    sink: &mut Sink,
    dir: Option<&Path>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, FrameSplitter::new(boundary.clone()));
    let mut received = 0u64;

    while let Some(frame) = framed.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(e) if is_end_of_stream(&e) => {
                debug!("Stream ended: {}", e);
                break;
            }
            Err(e) => return Err(e),
        };

        received += 1;
        match dir {
            Some(dir) => {
                let path = unique_message_path(dir).await?;
                info!("-- new message {} ({} bytes) --", path.display(), payload.len());
                tokio::fs::write(&path, &payload).await?;
            }
            None => info!("-- new message ({} bytes) --", payload.len()),
        }
        info!("{}", printable(&payload));
        sink.write(&payload).await?;
    }

    Ok(received)
}
