//! Serial device endpoint

use async_trait::async_trait;
use tokio_serial::{DataBits, SerialPortBuilderExt};
use tracing::{debug, info};

use super::{EndpointState, Transport};
use crate::connection::Connection;
use crate::descriptor::{Parity, SerialSettings, StopBits};
use crate::error::EndpointError;

fn data_bits(bits: u8) -> Option<DataBits> {
    match bits {
        5 => Some(DataBits::Five),
        6 => Some(DataBits::Six),
        7 => Some(DataBits::Seven),
        8 => Some(DataBits::Eight),
        _ => None,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

/// A local serial port.
///
/// Nothing is held open between connections: every `get_connection` opens
/// the device afresh and closing the connection releases it.
pub struct SerialDevice {
    settings: SerialSettings,
    reset: bool,
    state: EndpointState,
}

impl SerialDevice {
    pub fn new(settings: SerialSettings, reset: bool) -> Self {
        Self {
            settings,
            reset,
            state: EndpointState::default(),
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn data_bits(&self) -> Result<DataBits, EndpointError> {
        data_bits(self.settings.data_bits).ok_or_else(|| EndpointError::Unsupported {
            port: self.settings.port.clone(),
            reason: format!("{} data bits are not supported", self.settings.data_bits),
        })
    }

    fn stop_bits(&self) -> Result<tokio_serial::StopBits, EndpointError> {
        match self.settings.stop_bits {
            StopBits::One => Ok(tokio_serial::StopBits::One),
            StopBits::Two => Ok(tokio_serial::StopBits::Two),
            StopBits::OnePointFive => Err(EndpointError::Unsupported {
                port: self.settings.port.clone(),
                reason: "1.5 stop bits are not supported by the serial driver".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for SerialDevice {
    async fn start(&mut self) -> Result<(), EndpointError> {
        self.state.start()
    }

    async fn stop(&mut self) -> Result<(), EndpointError> {
        self.state.stop();
        Ok(())
    }

    async fn get_connection(&mut self) -> Result<Connection, EndpointError> {
        self.state.ensure_started()?;

        let data_bits = self.data_bits()?;
        let stop_bits = self.stop_bits()?;
        info!("Open serial port: {}", self.settings);

        let port = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity(self.settings.parity))
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|source| EndpointError::Open {
                port: self.settings.port.clone(),
                source,
            })?;

        let mut connection = Connection::serial(port, &self.settings.port);
        if self.reset {
            debug!("Resetting serial port {}", self.settings.port);
            connection
                .reset()
                .map_err(|e| EndpointError::Open {
                    port: self.settings.port.clone(),
                    source: e.into(),
                })?;
        }

        Ok(connection)
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}
