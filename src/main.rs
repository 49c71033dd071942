//! netio - TCP/TLS/serial throughput and integrity testing

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgGroup, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use netio::config::{Config, expand_home};
use netio::descriptor::DeviceDescriptor;
use netio::digest::HashAlgorithm;
use netio::endpoint::{EndpointConfig, Role};
use netio::framing::FrameBoundary;
use netio::net::AddressFamily;
use netio::runner::{DEFAULT_BUFFER_SIZE, DEFAULT_LOOP_TIMEOUT, Payload, RunConfig, Runner};
use netio::tls::TlsSettings;

/// Initialize logging with optional file output
fn init_logging(log_file: Option<&str>, log_level: Option<&str>) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = log_level.unwrap_or("info");
    let env_filter =
        EnvFilter::from_default_env().add_directive(format!("netio={}", level).parse()?);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time();

    if let Some(file_path) = log_file {
        let expanded_path = expand_home(file_path);

        // Ensure parent directory exists
        if let Some(parent) = expanded_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Create non-blocking file appender with daily rotation
        let file_appender = tracing_appender::rolling::daily(
            expanded_path
                .parent()
                .unwrap_or_else(|| std::path::Path::new(".")),
            expanded_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("netio.log")),
        );
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

        // Keep guard alive for the duration of the program
        std::mem::forget(_guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "netio")]
#[command(author, version, about = "TCP/TLS/serial throughput and integrity testing")]
#[command(group(ArgGroup::new("role").required(true).args(["client", "server"])))]
struct Cli {
    /// Run as client against DEVICE ("host:port" or "port[,baud[,databits[,parity[,stopbits]]]]")
    #[arg(short = 'c', long, value_name = "DEVICE")]
    client: Option<String>,

    /// Run as server on DEVICE
    #[arg(short = 's', long, value_name = "DEVICE")]
    server: Option<String>,

    /// File(s) to send (sender) or write to (receiver), one per loop
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Use TLS
    #[arg(long, env = "NETIO_TLS")]
    tls: bool,

    /// Verify the peer certificate (server: require client certificates)
    #[arg(long)]
    tls_verify: bool,

    /// TLS certificate (server identity or client certificate)
    #[arg(long, env = "NETIO_TLS_CERT")]
    tls_cert: Option<String>,

    /// TLS private key
    #[arg(long, env = "NETIO_TLS_KEY")]
    tls_key: Option<String>,

    /// CA certificate used for verification
    #[arg(long, env = "NETIO_TLS_CA")]
    tls_ca: Option<String>,

    /// Server sends data instead of receiving
    #[arg(long, visible_alias = "ds")]
    data_sender: bool,

    /// Client receives data instead of sending
    #[arg(long, visible_alias = "dr")]
    data_receiver: bool,

    /// Hash algorithm (md5, sha224, sha256)
    #[arg(short = 'y', long, env = "NETIO_HASH")]
    hash: Option<String>,

    /// Expected hash value(s), checked round-robin per loop
    #[arg(short = 'e', long = "expect", value_name = "HASH")]
    expected: Vec<String>,

    /// Send zero bytes instead of random bytes
    #[arg(long)]
    zero: bool,

    /// Buffer size (e.g., 32K, 1M)
    #[arg(long, value_parser = parse_size, env = "NETIO_BUFFER_SIZE")]
    buffer_size: Option<u64>,

    /// Number of loops, 0 for unbounded
    #[arg(long, env = "NETIO_LOOP_COUNT")]
    loop_count: Option<u64>,

    /// Inactivity timeout for receivers, payload duration for senders
    #[arg(long, value_parser = parse_duration, env = "NETIO_LOOP_TIMEOUT")]
    loop_timeout: Option<Duration>,

    /// Pause between sending loops
    #[arg(long, value_parser = parse_duration, env = "NETIO_LOOP_SLEEP")]
    loop_sleep: Option<Duration>,

    /// Text to send
    #[arg(short = 't', long)]
    text: Option<String>,

    /// Print received data
    #[arg(short = 'd', long)]
    data: bool,

    /// Amount of bytes to send (e.g., 10M)
    #[arg(short = 'l', long, value_parser = parse_size)]
    length: Option<u64>,

    /// HL7 MLLP message framing
    #[arg(long, conflicts_with_all = ["prefix", "suffix"])]
    hl7: bool,

    /// Hex prefix of each message frame
    #[arg(long, default_value = "")]
    prefix: String,

    /// Hex suffix of each message frame
    #[arg(long, default_value = "")]
    suffix: String,

    /// Limit throughput in bytes per second (e.g., 100K)
    #[arg(long, value_parser = parse_size, env = "NETIO_RATE")]
    rate: Option<u64>,

    /// Clear serial buffers after opening a port
    #[arg(long)]
    reset: bool,

    /// Address family (ipv4, ipv6, dual)
    #[arg(long, env = "NETIO_ADDRESS_FAMILY")]
    address_family: Option<String>,

    /// Configuration file (default: ~/.config/netio/config.toml)
    #[arg(long, env = "NETIO_CONFIG")]
    config: Option<PathBuf>,

    /// Log file path (e.g., "~/.config/netio/netio.log")
    #[arg(long, env = "NETIO_LOG_FILE")]
    log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "NETIO_LOG_LEVEL")]
    log_level: Option<String>,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();
    let s = s.trim_end_matches('B');
    let (num, suffix) = if s.ends_with('G') {
        (s.trim_end_matches('G'), 1024 * 1024 * 1024u64)
    } else if s.ends_with('M') {
        (s.trim_end_matches('M'), 1024 * 1024u64)
    } else if s.ends_with('K') {
        (s.trim_end_matches('K'), 1024u64)
    } else {
        (s, 1u64)
    };

    let n = num.parse::<u64>().map_err(|e| e.to_string())?;
    n.checked_mul(suffix)
        .ok_or_else(|| format!("size too large: {}", s))
}

/// Merge command line, config file and built-in defaults
fn run_config(cli: &Cli, file: &Config) -> Result<RunConfig> {
    let (role, device) = match (&cli.client, &cli.server) {
        (Some(device), _) => (Role::Client, device),
        (None, Some(device)) => (Role::Server, device),
        (None, None) => return Err(anyhow!("either --client or --server is required")),
    };
    let descriptor: DeviceDescriptor = device
        .parse()
        .with_context(|| format!("invalid device {:?}", device))?;

    let defaults = &file.defaults;
    let hash = match cli.hash.as_ref().or(defaults.hash.as_ref()) {
        Some(name) => name.parse::<HashAlgorithm>().map_err(|e| anyhow!(e))?,
        None => HashAlgorithm::default(),
    };
    let address_family = match cli.address_family.as_ref().or(defaults.address_family.as_ref()) {
        Some(family) => family.parse::<AddressFamily>().map_err(|e| anyhow!(e))?,
        None => AddressFamily::default(),
    };

    let from_file = |value: &Option<String>, name: &str| -> Result<Option<u64>> {
        value
            .as_deref()
            .map(parse_size)
            .transpose()
            .map_err(|e| anyhow!("invalid {} in config file: {}", name, e))
    };
    let duration_from_file = |value: &Option<String>, name: &str| -> Result<Option<Duration>> {
        value
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| anyhow!("invalid {} in config file: {}", name, e))
    };

    let buffer_size = match cli.buffer_size {
        Some(size) => Some(size),
        None => from_file(&defaults.buffer_size, "buffer_size")?,
    }
    .unwrap_or(DEFAULT_BUFFER_SIZE as u64);
    let rate = match cli.rate {
        Some(rate) => Some(rate),
        None => from_file(&defaults.rate, "rate")?,
    }
    .unwrap_or(0);
    let loop_timeout = match cli.loop_timeout {
        Some(timeout) => Some(timeout),
        None => duration_from_file(&defaults.loop_timeout, "loop_timeout")?,
    }
    .unwrap_or(DEFAULT_LOOP_TIMEOUT);
    let loop_sleep = match cli.loop_sleep {
        Some(sleep) => Some(sleep),
        None => duration_from_file(&defaults.loop_sleep, "loop_sleep")?,
    };

    let tls_path = |cli: &Option<String>, file: &Option<String>| {
        cli.as_ref().or(file.as_ref()).map(|p| expand_home(p))
    };
    let tls = TlsSettings {
        enabled: cli.tls || file.tls.enabled.unwrap_or(false),
        verify: cli.tls_verify || file.tls.verify.unwrap_or(false),
        cert_path: tls_path(&cli.tls_cert, &file.tls.cert),
        key_path: tls_path(&cli.tls_key, &file.tls.key),
        ca_path: tls_path(&cli.tls_ca, &file.tls.ca),
    };

    let framing = if cli.hl7 {
        Some(FrameBoundary::hl7())
    } else {
        FrameBoundary::from_hex(&cli.prefix, &cli.suffix)?
    };

    let mut config = RunConfig::new(role, descriptor);
    config.endpoint = EndpointConfig {
        tls,
        address_family,
        reset_serial: cli.reset || defaults.reset_serial.unwrap_or(false),
    };
    config.data_sender = cli.data_sender;
    config.data_receiver = cli.data_receiver;
    config.files = cli.files.clone();
    config.text = cli.text.clone();
    config.payload = if cli.zero { Payload::Zero } else { Payload::Random };
    config.buffer_size = usize::try_from(buffer_size).context("buffer size too large")?;
    config.loop_count = cli.loop_count.or(defaults.loop_count).unwrap_or(1);
    config.loop_timeout = loop_timeout;
    config.loop_sleep = loop_sleep;
    config.hash = hash;
    config.expected = cli.expected.clone();
    config.length = cli.length.unwrap_or(0);
    config.framing = framing;
    config.show_data = cli.data;
    config.rate = rate;

    Ok(config)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, stopping"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // An explicit config file must load; the default one is optional
    let file_config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load().unwrap_or_default(),
    };

    let log_file = cli.log_file.as_ref().or(file_config.logging.file.as_ref());
    let log_level = cli.log_level.as_ref().or(file_config.logging.level.as_ref());
    init_logging(log_file.map(|s| s.as_str()), log_level.map(|s| s.as_str()))?;

    let config = run_config(&cli, &file_config)?;
    let runner = Runner::start(config).await?;
    let summary = runner.run_until(shutdown_signal()).await?;

    if !summary.is_success() {
        error!(
            "Hash verification failed: {}",
            summary.verification
        );
        std::process::exit(1);
    }

    Ok(())
}
