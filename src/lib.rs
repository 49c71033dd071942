//! netio - TCP, TLS and serial throughput testing
//!
//! Moves bytes or framed messages between two endpoints, measuring
//! throughput and verifying content with digests.
//!
//! # Library Usage
//!
//! ```ignore
//! use netio::endpoint::{Endpoint, EndpointConfig, Role, Transport};
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let descriptor = "192.168.1.1:5201".parse()?;
//!     let mut endpoint = Endpoint::new(Role::Client, descriptor, &EndpointConfig::default())?;
//!     endpoint.start().await?;
//!
//!     let mut connection = endpoint.get_connection().await?;
//!     connection.write_all(b"hello").await?;
//!     connection.close().await?;
//!
//!     endpoint.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`descriptor`] - Device descriptor parsing (`host:port` or serial settings)
//! - [`endpoint`] - Network client, network server and serial device endpoints
//! - [`connection`] - The duplex stream handed out by endpoints
//! - [`throttle`], [`timeout`] - Stream decorators for rate limits and time bounds
//! - [`framing`] - Prefix/suffix message codec
//! - [`runner`] - Loop orchestration used by the binary

pub mod config;
pub mod connection;
pub mod descriptor;
pub mod digest;
pub mod endpoint;
pub mod error;
pub mod framing;
pub mod generator;
pub mod net;
pub mod runner;
pub mod stats;
pub mod throttle;
pub mod timeout;
pub mod tls;
pub mod transfer;

pub use connection::Connection;
pub use descriptor::{DeviceDescriptor, SerialSettings};
pub use endpoint::{Endpoint, EndpointConfig, Role, Transport};
pub use error::EndpointError;
pub use runner::{RunConfig, RunSummary, Runner};
