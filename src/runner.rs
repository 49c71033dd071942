//! Loop orchestration: one connection per loop, one transfer per connection

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::descriptor::DeviceDescriptor;
use crate::digest::{HashAlgorithm, Hasher, Verification};
use crate::endpoint::{Endpoint, EndpointConfig, Role, Transport};
use crate::error::format_duration;
use crate::framing::FrameBoundary;
use crate::generator::{RandomReader, ZeroReader};
use crate::stats::{TransferStats, bytes_to_human};
use crate::throttle::{ThrottledReader, ThrottledWriter};
use crate::timeout::{DeadlineReader, TimeoutReader};
use crate::transfer::{self, Sink};

pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
/// Serial drivers deliver small chunks; larger buffers only add latency
pub const SERIAL_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_LOOP_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SEND_SLEEP: Duration = Duration::from_secs(2);
pub const DEFAULT_RECEIVE_SLEEP: Duration = Duration::from_secs(1);

/// Generated payload when neither text nor files are given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    Random,
    Zero,
}

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Everything a run needs, fixed before the first loop
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub role: Role,
    pub descriptor: DeviceDescriptor,
    pub endpoint: EndpointConfig,
    /// Server sends instead of receiving
    pub data_sender: bool,
    /// Client receives instead of sending
    pub data_receiver: bool,
    pub files: Vec<PathBuf>,
    pub text: Option<String>,
    pub payload: Payload,
    pub buffer_size: usize,
    /// 0 = unbounded
    pub loop_count: u64,
    /// Inactivity timeout when receiving, deadline for generated payloads
    pub loop_timeout: Duration,
    /// Pause between sending loops; role default when unset
    pub loop_sleep: Option<Duration>,
    pub hash: HashAlgorithm,
    pub expected: Vec<String>,
    /// Bytes to send, 0 = unlimited
    pub length: u64,
    pub framing: Option<FrameBoundary>,
    /// Echo received data to stdout
    pub show_data: bool,
    /// Bytes per second, 0 = unlimited
    pub rate: u64,
}

impl RunConfig {
    pub fn new(role: Role, descriptor: DeviceDescriptor) -> Self {
        Self {
            role,
            descriptor,
            endpoint: EndpointConfig::default(),
            data_sender: false,
            data_receiver: false,
            files: Vec::new(),
            text: None,
            payload: Payload::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            loop_count: 1,
            loop_timeout: DEFAULT_LOOP_TIMEOUT,
            loop_sleep: None,
            hash: HashAlgorithm::default(),
            expected: Vec::new(),
            length: 0,
            framing: None,
            show_data: false,
            rate: 0,
        }
    }

    /// Whether this side produces the data
    pub fn sends(&self) -> bool {
        match self.role {
            Role::Client => !self.data_receiver,
            Role::Server => self.data_sender,
        }
    }

    pub fn receives(&self) -> bool {
        !self.sends()
    }

    /// Check option combinations and fill in defaults that depend on them
    pub fn finalize(mut self) -> Result<Self> {
        if self.buffer_size == 0 {
            bail!("buffer size must be positive");
        }

        if self.receives() && self.framing.is_some() && !self.files.is_empty() {
            if self.files.len() > 1 || !self.files[0].is_dir() {
                bail!(
                    "receiving messages needs exactly one existing directory, got {}",
                    self.files
                        .iter()
                        .map(|f| f.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }

        if self.descriptor.is_serial() {
            self.buffer_size = self.buffer_size.min(SERIAL_BUFFER_SIZE);
        }

        if self.sends() && self.length == 0 && self.loop_timeout.is_zero() {
            // A generated payload needs some bound
            self.loop_timeout = DEFAULT_LOOP_TIMEOUT;
        }

        if self.loop_sleep.is_none() {
            self.loop_sleep = Some(if self.sends() {
                DEFAULT_SEND_SLEEP
            } else {
                DEFAULT_RECEIVE_SLEEP
            });
        }

        if self.loop_count == 0 && self.framing.is_none() {
            if !self.files.is_empty() {
                self.loop_count = self.files.len() as u64;
            } else if !self.expected.is_empty() {
                self.loop_count = self.expected.len() as u64;
            }
        }

        Ok(self)
    }

    fn file_for_loop(&self, index: u64) -> Option<&PathBuf> {
        if self.files.is_empty() {
            None
        } else {
            Some(&self.files[(index % self.files.len() as u64) as usize])
        }
    }
}

/// What a run did
#[derive(Debug, Default)]
pub struct RunSummary {
    pub loops: u64,
    pub transfers: Vec<TransferStats>,
    pub verification: Verification,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        !self.verification.has_errors()
    }
}

enum Step {
    Done(Result<Option<TransferStats>>),
    Interrupted,
}

/// Drives the loops of one process over a started endpoint
pub struct Runner {
    config: RunConfig,
    endpoint: Endpoint,
    verification: Verification,
}

impl Runner {
    /// Validate the configuration and start the endpoint
    pub async fn start(config: RunConfig) -> Result<Self> {
        let config = config.finalize()?;
        info!("Buffer size: {}", bytes_to_human(config.buffer_size as u64));

        let mut endpoint = Endpoint::new(config.role, config.descriptor.clone(), &config.endpoint)?;
        let name = endpoint.name();
        endpoint
            .start()
            .await
            .with_context(|| format!("failed to start {} endpoint", name))?;
        info!(
            "Started {} on {} ({})",
            name,
            config.descriptor,
            if config.sends() { "sending" } else { "receiving" }
        );

        Ok(Self {
            verification: Verification::new(config.expected.clone()),
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Bound listener address when serving over the network
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Run all loops
    pub async fn run(self) -> Result<RunSummary> {
        self.run_until(std::future::pending()).await
    }

    /// Run all loops, stopping early when `shutdown` completes
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = RunSummary::default();
        let loop_count = self.config.loop_count;
        let loop_sleep = self.config.loop_sleep.unwrap_or(Duration::ZERO);

        let mut index = 0u64;
        let result = loop {
            if loop_count != 0 && index >= loop_count {
                break Ok(());
            }
            if loop_count != 1 {
                info!("Loop #{}", index + 1);
            }

            let step = tokio::select! {
                result = self.work(index) => Step::Done(result),
                _ = &mut shutdown => Step::Interrupted,
            };
            match step {
                Step::Done(Ok(stats)) => summary.transfers.extend(stats),
                Step::Done(Err(e)) => break Err(e),
                Step::Interrupted => {
                    summary.interrupted = true;
                    break Ok(());
                }
            }
            index += 1;
            summary.loops = index;

            let more = loop_count == 0 || index < loop_count;
            if self.config.sends() && more && !loop_sleep.is_zero() {
                info!("Loop sleep: {}", format_duration(loop_sleep));
                let interrupted = tokio::select! {
                    _ = tokio::time::sleep(loop_sleep) => false,
                    _ = &mut shutdown => true,
                };
                if interrupted {
                    summary.interrupted = true;
                    break Ok(());
                }
            }
        };

        if summary.interrupted {
            info!("Interrupted after {} loops", summary.loops);
        }
        if let Err(e) = self.endpoint.stop().await {
            warn!("Failed to stop {}: {}", self.endpoint.name(), e);
        }

        summary.verification = self.verification;
        if summary.verification.is_enabled() {
            info!("--- Summary ---");
            info!("Runs:    {}", summary.verification.runs);
            info!("Correct: {}", summary.verification.correct);
            info!("Errors:  {}", summary.verification.errors);
        }

        result.map(|()| summary)
    }

    async fn work(&mut self, index: u64) -> Result<Option<TransferStats>> {
        let mut connection = self.endpoint.get_connection().await?;
        debug!("Got connection {:?}", connection);

        let result = self.exchange(index, &mut connection).await;
        if let Err(e) = connection.close().await {
            debug!("Closing connection to {}: {}", connection.peer(), e);
        }
        result
    }

    async fn exchange(
        &mut self,
        index: u64,
        connection: &mut Connection,
    ) -> Result<Option<TransferStats>> {
        let stats = match (self.config.sends(), self.config.framing.clone()) {
            (true, Some(boundary)) => self.send_messages(connection, &boundary).await?,
            (true, None) => self.send_bytes(index, connection).await?,
            (false, Some(boundary)) => self.receive_messages(connection, &boundary).await?,
            (false, None) => self.receive_bytes(index, connection).await?,
        };

        info!(
            "{} hash: {}",
            stats.algorithm.to_string().to_uppercase(),
            stats.digest
        );
        self.verification.check(index, &stats.digest);
        Ok(Some(stats))
    }

    async fn payload_source(&self, index: u64) -> Result<BoxedReader> {
        if let Some(text) = &self.config.text {
            info!("Sending text {} ...", text);
            return Ok(Box::new(std::io::Cursor::new(text.clone().into_bytes())));
        }

        if let Some(path) = self.config.file_for_loop(index) {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            let size = file.metadata().await?.len();
            info!(
                "Sending file content: {} {} ...",
                path.display(),
                bytes_to_human(size)
            );
            return Ok(Box::new(file));
        }

        Ok(match self.config.payload {
            Payload::Random => {
                info!("Sending random bytes ...");
                Box::new(RandomReader::new())
            }
            Payload::Zero => {
                info!("Sending zero bytes ...");
                Box::new(ZeroReader)
            }
        })
    }

    async fn send_bytes(&mut self, index: u64, connection: &mut Connection) -> Result<TransferStats> {
        let mut source = self.payload_source(index).await?;
        let config = &self.config;

        if config.files.is_empty() && config.expected.is_empty() && !config.loop_timeout.is_zero()
        {
            source = Box::new(DeadlineReader::new(source, config.loop_timeout));
        }
        if config.length > 0 {
            source = Box::new(source.take(config.length));
        }

        let mut hasher = Hasher::new(config.hash);
        let mut writer = ThrottledWriter::new(connection, config.rate);
        let start = Instant::now();
        let bytes =
            transfer::send_stream(&mut source, &mut writer, &mut hasher, config.buffer_size)
                .await
                .context("sending failed")?;

        let stats = TransferStats {
            bytes,
            duration: start.elapsed(),
            digest: hasher.finalize_reset(),
            algorithm: config.hash,
            messages: None,
        };
        info!("Bytes sent: {}", stats);
        Ok(stats)
    }

    async fn receive_sink(&self, index: u64) -> Result<Sink> {
        let mut sink = Sink::new(Hasher::new(self.config.hash));
        if let Some(path) = self.config.file_for_loop(index) {
            sink = sink
                .with_file(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
        }
        if self.config.show_data {
            sink = sink.with_echo();
        }
        Ok(sink)
    }

    async fn receive_bytes(
        &mut self,
        index: u64,
        connection: &mut Connection,
    ) -> Result<TransferStats> {
        let mut sink = self.receive_sink(index).await?;
        let config = &self.config;
        let serial = connection.is_serial();

        info!("Reading bytes ...");
        let (bytes, duration) = if serial {
            transfer::receive_until_idle(
                connection,
                &mut sink,
                config.loop_timeout,
                config.buffer_size,
                config.rate,
            )
            .await
            .context("receiving failed")?
        } else {
            // Throttle outside the timeout: only transport silence counts as idle
            let mut reader =
                ThrottledReader::new(TimeoutReader::new(connection, config.loop_timeout), config.rate);
            let bytes = transfer::receive_stream(&mut reader, &mut sink, config.buffer_size)
                .await
                .context("receiving failed")?;
            (bytes, reader.get_ref().transfer_duration())
        };

        let stats = TransferStats {
            bytes,
            duration,
            digest: sink.finish().await?,
            algorithm: config.hash,
            messages: None,
        };
        info!("Bytes received: {}", stats);
        Ok(stats)
    }

    async fn message_payloads(&self) -> Result<Vec<Bytes>> {
        if let Some(text) = &self.config.text {
            return Ok(vec![Bytes::from(text.clone())]);
        }
        if self.config.files.is_empty() {
            bail!("sending messages needs a text or at least one file");
        }

        let mut payloads = Vec::with_capacity(self.config.files.len());
        for path in &self.config.files {
            info!("Sending message file content: {} ...", path.display());
            let content = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            payloads.push(Bytes::from(content));
        }
        Ok(payloads)
    }

    async fn send_messages(
        &mut self,
        connection: &mut Connection,
        boundary: &FrameBoundary,
    ) -> Result<TransferStats> {
        let payloads = self.message_payloads().await?;
        let bytes = payloads.iter().map(|p| p.len() as u64).sum();
        let config = &self.config;

        let mut hasher = Hasher::new(config.hash);
        let mut writer = ThrottledWriter::new(connection, config.rate);
        let start = Instant::now();
        let messages = transfer::send_messages(&mut writer, boundary, payloads, &mut hasher)
            .await
            .context("sending messages failed")?;

        let stats = TransferStats {
            bytes,
            duration: start.elapsed(),
            digest: hasher.finalize_reset(),
            algorithm: config.hash,
            messages: Some(messages),
        };
        info!("Messages sent: {}", stats);
        Ok(stats)
    }

    async fn receive_messages(
        &mut self,
        connection: &mut Connection,
        boundary: &FrameBoundary,
    ) -> Result<TransferStats> {
        let mut sink = Sink::new(Hasher::new(self.config.hash));
        if self.config.show_data {
            sink = sink.with_echo();
        }
        let config = &self.config;
        let dir = config.files.first().map(PathBuf::as_path);

        info!("Reading messages ...");
        let mut reader =
            ThrottledReader::new(TimeoutReader::new(connection, config.loop_timeout), config.rate);
        let messages = transfer::receive_messages(&mut reader, boundary, &mut sink, dir)
            .await
            .context("receiving messages failed")?;

        let stats = TransferStats {
            bytes: sink.bytes(),
            duration: reader.get_ref().transfer_duration(),
            digest: sink.finish().await?,
            algorithm: config.hash,
            messages: Some(messages),
        };
        info!("Messages received: {}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RunConfig {
        RunConfig::new(Role::Client, "localhost:5201".parse().unwrap())
    }

    #[test]
    fn test_direction() {
        let mut config = client();
        assert!(config.sends());
        config.data_receiver = true;
        assert!(config.receives());

        let mut config = RunConfig::new(Role::Server, ":5201".parse().unwrap());
        assert!(config.receives());
        config.data_sender = true;
        assert!(config.sends());
    }

    #[test]
    fn test_loop_count_defaults() {
        let mut config = client();
        config.loop_count = 0;
        config.files = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(config.finalize().unwrap().loop_count, 3);

        let mut config = client();
        config.loop_count = 0;
        config.expected = vec!["x".into(), "y".into()];
        assert_eq!(config.finalize().unwrap().loop_count, 2);

        // Framing keeps an unbounded run
        let mut config = client();
        config.loop_count = 0;
        config.files = vec!["a".into()];
        config.framing = Some(FrameBoundary::hl7());
        assert_eq!(config.finalize().unwrap().loop_count, 0);
    }

    #[test]
    fn test_sleep_and_timeout_defaults() {
        let mut config = client();
        config.loop_timeout = Duration::ZERO;
        let config = config.finalize().unwrap();
        assert_eq!(config.loop_timeout, DEFAULT_LOOP_TIMEOUT);
        assert_eq!(config.loop_sleep, Some(DEFAULT_SEND_SLEEP));

        let mut config = RunConfig::new(Role::Server, ":5201".parse().unwrap());
        config.loop_timeout = Duration::ZERO;
        let config = config.finalize().unwrap();
        assert_eq!(config.loop_timeout, Duration::ZERO);
        assert_eq!(config.loop_sleep, Some(DEFAULT_RECEIVE_SLEEP));

        let mut config = client();
        config.loop_sleep = Some(Duration::ZERO);
        assert_eq!(config.finalize().unwrap().loop_sleep, Some(Duration::ZERO));
    }

    #[test]
    fn test_serial_buffer_clamped() {
        let config = RunConfig::new(Role::Client, "/dev/ttyUSB0,115200".parse().unwrap());
        assert_eq!(config.finalize().unwrap().buffer_size, SERIAL_BUFFER_SIZE);

        let mut config = client();
        config.buffer_size = 512;
        assert_eq!(config.finalize().unwrap().buffer_size, 512);
    }

    #[test]
    fn test_message_directory_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::new(Role::Server, ":5201".parse().unwrap());
        config.framing = Some(FrameBoundary::hl7());
        config.files = vec![dir.path().to_path_buf()];
        assert!(config.clone().finalize().is_ok());

        config.files = vec![dir.path().join("missing")];
        assert!(config.clone().finalize().is_err());

        config.files = vec![dir.path().to_path_buf(), dir.path().to_path_buf()];
        assert!(config.finalize().is_err());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut config = client();
        config.buffer_size = 0;
        assert!(config.finalize().is_err());
    }
}
