//! Endpoint errors and end-of-stream classification

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::descriptor::DescriptorError;
use crate::tls::TlsError;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid device descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection on {addr}: {source}")]
    Accept {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {peer} not completed")]
    HandshakeIncomplete { peer: String },

    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("unsupported serial setting for {port}: {reason}")]
    Unsupported { port: String, reason: String },

    #[error("endpoint has not been started")]
    NotStarted,

    #[error("endpoint has been stopped")]
    Stopped,
}

impl EndpointError {
    /// Errors a server accept loop drops and retries after.
    ///
    /// A failed handshake only concerns the peer that caused it; the listener
    /// stays usable for the next client.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Handshake { .. } | Self::HandshakeIncomplete { .. }
        )
    }
}

/// Whether an I/O error only marks the end of a transfer.
///
/// Peers closing or resetting a connection, truncated TLS sessions and
/// timeouts end a benchmark stream; they are not failures of the transfer.
pub fn is_end_of_stream(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
    )
}

/// Error returned by reads and writes on a closed connection
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

/// Formats a duration the way log lines show loop timings
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(Duration::from_millis(duration.as_millis() as u64)).to_string()
}
