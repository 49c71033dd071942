//! Transport endpoints.
//!
//! An endpoint owns the connection-establishment policy for one transport:
//! dialing a server, accepting clients, or opening a serial device. All of
//! them share the same lifecycle:
//!
//! ```text
//! Uninitialized --start--> Started --get_connection--> Started ... --stop--> Stopped
//! ```
//!
//! `stop` before `start` is a no-op, and a stopped endpoint cannot be
//! restarted.

mod network;
mod serial;

pub use network::{NetworkClient, NetworkServer};
pub use serial::SerialDevice;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::connection::Connection;
use crate::descriptor::DeviceDescriptor;
use crate::error::EndpointError;
use crate::net::AddressFamily;
use crate::tls::TlsSettings;

/// Which side of the link this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Transport options for endpoint construction
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    pub tls: TlsSettings,
    pub address_family: AddressFamily,
    /// Clear serial input/output buffers after opening the port
    pub reset_serial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    #[default]
    Uninitialized,
    Started,
    Stopped,
}

impl EndpointState {
    /// Transition for `start`
    pub(crate) fn start(&mut self) -> Result<(), EndpointError> {
        match self {
            Self::Stopped => Err(EndpointError::Stopped),
            _ => {
                *self = Self::Started;
                Ok(())
            }
        }
    }

    /// Transition for `stop`; returns whether resources need releasing
    pub(crate) fn stop(&mut self) -> bool {
        match self {
            Self::Started => {
                *self = Self::Stopped;
                true
            }
            _ => false,
        }
    }

    /// Guard for `get_connection`
    pub(crate) fn ensure_started(&self) -> Result<(), EndpointError> {
        match self {
            Self::Started => Ok(()),
            Self::Uninitialized => Err(EndpointError::NotStarted),
            Self::Stopped => Err(EndpointError::Stopped),
        }
    }
}

/// Capability shared by every endpoint variant
#[async_trait]
pub trait Transport: Send {
    /// Acquire whatever the transport keeps open between connections
    async fn start(&mut self) -> Result<(), EndpointError>;

    /// Release resources acquired by `start`. Idempotent.
    async fn stop(&mut self) -> Result<(), EndpointError>;

    /// Obtain the next connection, waiting for a peer where necessary
    async fn get_connection(&mut self) -> Result<Connection, EndpointError>;

    fn state(&self) -> EndpointState;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}

/// The closed set of endpoint variants
pub enum Endpoint {
    NetworkClient(NetworkClient),
    NetworkServer(NetworkServer),
    SerialDevice(SerialDevice),
}

impl Endpoint {
    /// Select the variant from the descriptor shape and the role.
    ///
    /// Serial devices behave the same on both sides of the link.
    pub fn new(
        role: Role,
        descriptor: DeviceDescriptor,
        config: &EndpointConfig,
    ) -> Result<Self, EndpointError> {
        match (descriptor, role) {
            (DeviceDescriptor::Serial(settings), _) => Ok(Self::SerialDevice(SerialDevice::new(
                settings,
                config.reset_serial,
            ))),
            (DeviceDescriptor::Network { host, port }, Role::Client) => Ok(Self::NetworkClient(
                NetworkClient::new(host, port, config)?,
            )),
            (DeviceDescriptor::Network { host, port }, Role::Server) => Ok(Self::NetworkServer(
                NetworkServer::new(host, port, config)?,
            )),
        }
    }

    /// Bound listener address of a started server
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::NetworkServer(server) => server.local_addr(),
            _ => None,
        }
    }

    fn inner(&mut self) -> &mut dyn Transport {
        match self {
            Self::NetworkClient(e) => e,
            Self::NetworkServer(e) => e,
            Self::SerialDevice(e) => e,
        }
    }

    fn inner_ref(&self) -> &dyn Transport {
        match self {
            Self::NetworkClient(e) => e,
            Self::NetworkServer(e) => e,
            Self::SerialDevice(e) => e,
        }
    }
}

#[async_trait]
impl Transport for Endpoint {
    async fn start(&mut self) -> Result<(), EndpointError> {
        self.inner().start().await
    }

    async fn stop(&mut self) -> Result<(), EndpointError> {
        self.inner().stop().await
    }

    async fn get_connection(&mut self) -> Result<Connection, EndpointError> {
        self.inner().get_connection().await
    }

    fn state(&self) -> EndpointState {
        self.inner_ref().state()
    }

    fn name(&self) -> &'static str {
        self.inner_ref().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = EndpointState::default();
        assert!(matches!(
            state.ensure_started(),
            Err(EndpointError::NotStarted)
        ));

        // Stop before start is a no-op
        assert!(!state.stop());
        assert_eq!(state, EndpointState::Uninitialized);

        state.start().unwrap();
        assert!(state.ensure_started().is_ok());

        assert!(state.stop());
        assert!(!state.stop());
        assert!(matches!(state.ensure_started(), Err(EndpointError::Stopped)));
        assert!(matches!(state.start(), Err(EndpointError::Stopped)));
    }

    #[test]
    fn test_variant_selection() {
        let config = EndpointConfig::default();

        let endpoint = Endpoint::new(
            Role::Client,
            "127.0.0.1:5201".parse().unwrap(),
            &config,
        )
        .unwrap();
        assert_eq!(endpoint.name(), "network-client");

        let endpoint = Endpoint::new(Role::Server, ":5201".parse().unwrap(), &config).unwrap();
        assert_eq!(endpoint.name(), "network-server");

        for role in [Role::Client, Role::Server] {
            let endpoint = Endpoint::new(role, "COM3,115200".parse().unwrap(), &config).unwrap();
            assert_eq!(endpoint.name(), "serial");
            assert_eq!(endpoint.state(), EndpointState::Uninitialized);
        }
    }
}
