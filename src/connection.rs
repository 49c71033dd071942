//! Duplex connection handle shared by all transports

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream};
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};
use tracing::debug;

use crate::error::closed_error;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

#[allow(clippy::large_enum_variant)]
enum Transport {
    Tcp(TcpStream),
    TlsClient(ClientTlsStream<TcpStream>),
    TlsServer(ServerTlsStream<TcpStream>),
    Serial(SerialStream),
}

impl Transport {
    fn io(&mut self) -> &mut dyn AsyncStream {
        match self {
            Self::Tcp(s) => s,
            Self::TlsClient(s) => s,
            Self::TlsServer(s) => s,
            Self::Serial(s) => s,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::TlsClient(_) | Self::TlsServer(_) => "tls",
            Self::Serial(_) => "serial",
        }
    }
}

/// A live byte stream obtained from an endpoint.
///
/// Reads and writes go straight to the transport. After [`Connection::close`]
/// the handle is empty: further I/O fails with `NotConnected` and further
/// closes do nothing.
pub struct Connection {
    transport: Option<Transport>,
    peer: String,
}

impl Connection {
    pub fn tcp(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            transport: Some(Transport::Tcp(stream)),
            peer: peer.to_string(),
        }
    }

    pub fn tls_client(stream: ClientTlsStream<TcpStream>, peer: SocketAddr) -> Self {
        Self {
            transport: Some(Transport::TlsClient(stream)),
            peer: peer.to_string(),
        }
    }

    pub fn tls_server(stream: ServerTlsStream<TcpStream>, peer: SocketAddr) -> Self {
        Self {
            transport: Some(Transport::TlsServer(stream)),
            peer: peer.to_string(),
        }
    }

    pub fn serial(port: SerialStream, name: &str) -> Self {
        Self {
            transport: Some(Transport::Serial(port)),
            peer: name.to_string(),
        }
    }

    /// Remote address, or the device name for serial ports
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Transport name ("tcp", "tls", "serial"), `None` once closed
    pub fn kind(&self) -> Option<&'static str> {
        self.transport.as_ref().map(Transport::kind)
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.transport, Some(Transport::Serial(_)))
    }

    /// Shut the transport down and release it. Idempotent.
    pub async fn close(&mut self) -> io::Result<()> {
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };

        debug!("Closing {} connection to {}", transport.kind(), self.peer);
        match transport.io().shutdown().await {
            Ok(()) => Ok(()),
            // The peer may already be gone; the handle is released either way
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Discard pending input and output where the transport buffers it
    pub fn reset(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Some(Transport::Serial(port)) => {
                debug!("Clearing serial buffers of {}", self.peer);
                port.clear(ClearBuffer::All).map_err(io::Error::from)
            }
            Some(_) => Ok(()),
            None => Err(closed_error()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind())
            .field("peer", &self.peer)
            .finish()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().transport.as_mut() {
            Some(transport) => Pin::new(transport.io()).poll_read(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().transport.as_mut() {
            Some(transport) => Pin::new(transport.io()).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().transport.as_mut() {
            Some(transport) => Pin::new(transport.io()).poll_flush(cx),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().transport.as_mut() {
            Some(transport) => Pin::new(transport.io()).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
