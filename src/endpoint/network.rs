//! TCP and TLS endpoints

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use super::{EndpointConfig, EndpointState, Transport};
use crate::connection::Connection;
use crate::error::EndpointError;
use crate::net::{self, AddressFamily};
use crate::tls::{self, DEFAULT_SERVER_NAME};

fn display_addr(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Dials a server for every connection
pub struct NetworkClient {
    host: String,
    port: u16,
    family: AddressFamily,
    connector: Option<TlsConnector>,
    state: EndpointState,
}

impl NetworkClient {
    /// TLS material is loaded here so configuration errors surface before
    /// the first dial.
    pub fn new(host: String, port: u16, config: &EndpointConfig) -> Result<Self, EndpointError> {
        let connector = config.tls.create_connector()?;

        Ok(Self {
            host,
            port,
            family: config.address_family,
            connector,
            state: EndpointState::default(),
        })
    }

    /// Host to dial; descriptors like `:5201` mean the local machine
    fn dial_host(&self) -> &str {
        if self.host.is_empty() {
            DEFAULT_SERVER_NAME
        } else {
            &self.host
        }
    }
}

#[async_trait]
impl Transport for NetworkClient {
    async fn start(&mut self) -> Result<(), EndpointError> {
        self.state.start()
    }

    async fn stop(&mut self) -> Result<(), EndpointError> {
        self.state.stop();
        Ok(())
    }

    async fn get_connection(&mut self) -> Result<Connection, EndpointError> {
        self.state.ensure_started()?;

        let addr = display_addr(self.dial_host(), self.port);
        match &self.connector {
            None => info!("Dial connection: {}...", addr),
            Some(_) => info!("Dial TLS connection: {}...", addr),
        }

        let (stream, peer) = net::connect_tcp(self.dial_host(), self.port, self.family)
            .await
            .map_err(|source| EndpointError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let Some(connector) = &self.connector else {
            return Ok(Connection::tcp(stream, peer));
        };

        // SNI from the descriptor host so self-signed certificates for
        // "localhost" keep working with host-less descriptors
        let server_name = tls::server_name(&self.host)?;

        info!("TLS handshake: {}...", addr);
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|source| EndpointError::Handshake {
                peer: peer.to_string(),
                source,
            })?;

        let (_, session) = tls_stream.get_ref();
        if session.is_handshaking() {
            return Err(EndpointError::HandshakeIncomplete {
                peer: peer.to_string(),
            });
        }
        debug!(
            "TLS session established with {}: {:?}",
            peer,
            session.negotiated_cipher_suite().map(|s| s.suite())
        );

        Ok(Connection::tls_client(tls_stream, peer))
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn name(&self) -> &'static str {
        "network-client"
    }
}

/// Listens on the descriptor address and accepts one client per connection
pub struct NetworkServer {
    host: String,
    port: u16,
    family: AddressFamily,
    acceptor: Option<TlsAcceptor>,
    listener: Option<TcpListener>,
    state: EndpointState,
}

impl NetworkServer {
    pub fn new(host: String, port: u16, config: &EndpointConfig) -> Result<Self, EndpointError> {
        let acceptor = config.tls.create_acceptor()?;
        if acceptor.is_some() && config.tls.verify {
            info!("TLS client certificate verification enabled");
        }

        Ok(Self {
            host,
            port,
            family: config.address_family,
            acceptor,
            listener: None,
            state: EndpointState::default(),
        })
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn addr(&self) -> String {
        match self.local_addr() {
            Some(addr) => addr.to_string(),
            None => display_addr(&self.host, self.port),
        }
    }

    async fn accept_one(&self, listener: &TcpListener) -> Result<Connection, EndpointError> {
        info!("Accept connection ...");

        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|source| EndpointError::Accept {
                addr: self.addr(),
                source,
            })?;
        let peer = net::normalize_addr(peer);

        let Some(acceptor) = &self.acceptor else {
            info!("Connected: {}", peer);
            return Ok(Connection::tcp(stream, peer));
        };

        let tls_stream = acceptor
            .accept(stream)
            .await
            .map_err(|source| EndpointError::Handshake {
                peer: peer.to_string(),
                source,
            })?;

        if tls_stream.get_ref().1.is_handshaking() {
            return Err(EndpointError::HandshakeIncomplete {
                peer: peer.to_string(),
            });
        }

        info!("Connected: {} (TLS)", peer);
        Ok(Connection::tls_server(tls_stream, peer))
    }
}

#[async_trait]
impl Transport for NetworkServer {
    async fn start(&mut self) -> Result<(), EndpointError> {
        if self.state == EndpointState::Stopped {
            return Err(EndpointError::Stopped);
        }
        if self.listener.is_some() {
            return Ok(());
        }

        match &self.acceptor {
            None => info!("Create TCP listener: {}...", self.addr()),
            Some(_) => info!("Create TLS listener: {}...", self.addr()),
        }

        let listener = net::create_tcp_listener(&self.host, self.port, self.family)
            .await
            .map_err(|source| EndpointError::Listen {
                addr: self.addr(),
                source,
            })?;
        self.listener = Some(listener);
        self.state.start()
    }

    async fn stop(&mut self) -> Result<(), EndpointError> {
        self.state.stop();
        if let Some(listener) = self.listener.take() {
            debug!("Closing listener {:?}", listener.local_addr().ok());
        }
        Ok(())
    }

    async fn get_connection(&mut self) -> Result<Connection, EndpointError> {
        self.state.ensure_started()?;
        let listener = self.listener.as_ref().ok_or(EndpointError::NotStarted)?;

        loop {
            match self.accept_one(listener).await {
                Ok(connection) => return Ok(connection),
                Err(e) if e.is_recoverable() => {
                    // The half-open socket was dropped with the failed handshake
                    warn!("{}", e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn name(&self) -> &'static str {
        "network-server"
    }
}
