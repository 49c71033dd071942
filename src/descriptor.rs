//! Device descriptor parsing
//!
//! A descriptor names either a network address (`host:port`) or a serial
//! device with optional line settings (`port[,baud[,databits[,parity[,stopbits]]]]`).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Errors raised while parsing a device descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("empty device descriptor")]
    Empty,

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("too many serial options in {0:?} (expected port,baud,databits,parity,stopbits)")]
    TooManyFields(String),
}

impl DescriptorError {
    fn invalid(field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = DescriptorError;

    /// Only the first character counts, so `E`, `e` and `even` are equivalent.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('N') => Ok(Self::None),
            Some('O') => Ok(Self::Odd),
            Some('E') => Ok(Self::Even),
            _ => Err(DescriptorError::invalid("parity", s)),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "N"),
            Self::Odd => write!(f, "O"),
            Self::Even => write!(f, "E"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl FromStr for StopBits {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::One),
            "1.5" => Ok(Self::OnePointFive),
            "2" => Ok(Self::Two),
            _ => Err(DescriptorError::invalid("stopbits", s)),
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "1"),
            Self::OnePointFive => write!(f, "1.5"),
            Self::Two => write!(f, "2"),
        }
    }
}

/// Serial line settings decoded from a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialSettings {
    /// Settings for `port` with the 9600/8/N/1 defaults
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

/// Any positive integer is accepted as a baud rate; drivers reject rates the
/// hardware cannot produce when the port is opened.
fn parse_baud_rate(s: &str) -> Result<u32, DescriptorError> {
    match s.trim().parse::<u32>() {
        Ok(baud) if baud > 0 => Ok(baud),
        _ => Err(DescriptorError::invalid("baudrate", s)),
    }
}

fn parse_data_bits(s: &str) -> Result<u8, DescriptorError> {
    match s.trim().parse::<u8>() {
        Ok(bits @ 5..=8) => Ok(bits),
        _ => Err(DescriptorError::invalid("databits", s)),
    }
}

impl FromStr for SerialSettings {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() > 5 {
            return Err(DescriptorError::TooManyFields(s.to_string()));
        }

        let port = fields[0].trim();
        if port.is_empty() {
            return Err(DescriptorError::invalid("port", fields[0]));
        }

        let mut settings = Self::new(port);
        if let Some(baud) = fields.get(1) {
            settings.baud_rate = parse_baud_rate(baud)?;
        }
        if let Some(bits) = fields.get(2) {
            settings.data_bits = parse_data_bits(bits)?;
        }
        if let Some(parity) = fields.get(3) {
            settings.parity = parity.parse()?;
        }
        if let Some(stop_bits) = fields.get(4) {
            settings.stop_bits = stop_bits.parse()?;
        }

        Ok(settings)
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.port, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// Parsed device descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDescriptor {
    /// `host:port`; the host may be empty (all interfaces / localhost)
    Network { host: String, port: u16 },
    Serial(SerialSettings),
}

impl DeviceDescriptor {
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial(_))
    }

    /// Host portion of a network descriptor
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Network { host, .. } => Some(host),
            Self::Serial(_) => None,
        }
    }
}

fn parse_network(s: &str) -> Result<DeviceDescriptor, DescriptorError> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| DescriptorError::invalid("address", s))?;

    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| DescriptorError::invalid("port", port))?;

    Ok(DeviceDescriptor::Network {
        host: host.to_string(),
        port,
    })
}

impl FromStr for DeviceDescriptor {
    type Err = DescriptorError;

    /// Anything containing a colon is a network address, everything else a
    /// serial device.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DescriptorError::Empty);
        }

        if s.contains(':') {
            parse_network(s)
        } else {
            Ok(Self::Serial(s.parse()?))
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Self::Network { host, port } => write!(f, "{}:{}", host, port),
            Self::Serial(settings) => write!(f, "{}", settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_serial_descriptor() {
        let descriptor: DeviceDescriptor = "COM3,19200,7,E,2".parse().unwrap();
        assert_eq!(
            descriptor,
            DeviceDescriptor::Serial(SerialSettings {
                port: "COM3".to_string(),
                baud_rate: 19200,
                data_bits: 7,
                parity: Parity::Even,
                stop_bits: StopBits::Two,
            })
        );
    }

    #[test]
    fn test_serial_defaults() {
        let settings: SerialSettings = "/dev/ttyUSB0".parse().unwrap();
        assert_eq!(settings, SerialSettings::new("/dev/ttyUSB0"));
        assert_eq!(settings.to_string(), "/dev/ttyUSB0,9600,8,N,1");

        let settings: SerialSettings = "COM4,115200".parse().unwrap();
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, StopBits::One);
    }

    #[test]
    fn test_serial_round_trip() {
        for raw in ["COM3,19200,7,E,2", "COM1,9600,8,N,1", "ttyS0,57600,6,O,1.5"] {
            let settings: SerialSettings = raw.parse().unwrap();
            assert_eq!(settings.to_string(), raw);
        }

        let settings: SerialSettings = "COM3,19200,7".parse().unwrap();
        assert_eq!(settings.to_string(), "COM3,19200,7,N,1");
    }

    #[test]
    fn test_parity_first_character() {
        assert_eq!("even".parse::<Parity>(), Ok(Parity::Even));
        assert_eq!("o".parse::<Parity>(), Ok(Parity::Odd));
        assert_eq!("None".parse::<Parity>(), Ok(Parity::None));
    }

    #[test]
    fn test_invalid_parity_names_field() {
        let err = "COM3,9600,8,X".parse::<SerialSettings>().unwrap_err();
        assert_eq!(
            err,
            DescriptorError::InvalidField {
                field: "parity",
                value: "X".to_string()
            }
        );
        assert!(err.to_string().contains("parity"));
    }

    #[test]
    fn test_invalid_fields() {
        let cases = [
            ("COM3,fast", "baudrate"),
            ("COM3,0", "baudrate"),
            ("COM3,9600,9", "databits"),
            ("COM3,9600,x", "databits"),
            ("COM3,9600,8,N,3", "stopbits"),
            ("COM3,9600,8,N,", "stopbits"),
            (",9600", "port"),
        ];

        for (raw, expected) in cases {
            match raw.parse::<SerialSettings>() {
                Err(DescriptorError::InvalidField { field, .. }) => {
                    assert_eq!(field, expected, "descriptor {}", raw)
                }
                other => panic!("unexpected result for {}: {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_too_many_fields() {
        assert!(matches!(
            "COM3,9600,8,N,1,extra".parse::<SerialSettings>(),
            Err(DescriptorError::TooManyFields(_))
        ));
    }

    #[test]
    fn test_network_descriptor() {
        let descriptor: DeviceDescriptor = "192.168.1.10:5201".parse().unwrap();
        assert_eq!(
            descriptor,
            DeviceDescriptor::Network {
                host: "192.168.1.10".to_string(),
                port: 5201
            }
        );
        assert!(!descriptor.is_serial());
        assert_eq!(descriptor.to_string(), "192.168.1.10:5201");
    }

    #[test]
    fn test_network_without_host() {
        let descriptor: DeviceDescriptor = ":9999".parse().unwrap();
        assert_eq!(descriptor.host(), Some(""));
        assert_eq!(descriptor.to_string(), ":9999");
    }

    #[test]
    fn test_ipv6_network_descriptor() {
        let descriptor: DeviceDescriptor = "[::1]:5201".parse().unwrap();
        assert_eq!(descriptor.host(), Some("::1"));
        assert_eq!(descriptor.to_string(), "[::1]:5201");
    }

    #[test]
    fn test_invalid_port() {
        assert_eq!(
            "localhost:http".parse::<DeviceDescriptor>(),
            Err(DescriptorError::InvalidField {
                field: "port",
                value: "http".to_string()
            })
        );
        assert!("localhost:70000".parse::<DeviceDescriptor>().is_err());
    }

    #[test]
    fn test_empty_descriptor() {
        assert_eq!("  ".parse::<DeviceDescriptor>(), Err(DescriptorError::Empty));
    }
}
