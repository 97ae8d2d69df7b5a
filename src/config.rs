//! Driver configuration, as delivered by the device's configuration store.
//!
//! Nothing here is validated beyond what is needed to pick a transport.

use serde::Deserialize;

use crate::tcp;

/// Where the inverter is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// RS485 multidrop line.
    Serial {
        /// Serial device, e.g. `/dev/ttyUSB0`.
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// Modbus TCP endpoint.
    Network {
        host: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriverConfig {
    /// Index into [`PROFILES`](crate::profile::PROFILES).
    #[serde(default)]
    pub profile_index: usize,
    /// Modbus unit id. Defaults to 1 on serial lines and 255 over TCP.
    #[serde(default)]
    pub unit_id: Option<u8>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,
    pub transport: TransportConfig,
}

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_SERIAL_UNIT_ID: u8 = 1;
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 1000;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_tcp_port() -> u16 {
    tcp::DEFAULT_PORT
}

fn default_poll_interval_ms() -> u32 {
    DEFAULT_POLL_INTERVAL_MS
}

impl DriverConfig {
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            profile_index: 0,
            unit_id: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            transport: TransportConfig::Serial {
                port: port.into(),
                baud_rate,
            },
        }
    }

    pub fn network(host: impl Into<String>, port: u16) -> Self {
        Self {
            profile_index: 0,
            unit_id: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            transport: TransportConfig::Network {
                host: host.into(),
                port,
            },
        }
    }

    pub fn with_profile(mut self, profile_index: usize) -> Self {
        self.profile_index = profile_index;
        self
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u32) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// The configured unit id, or the usual one for the transport kind.
    pub fn effective_unit_id(&self) -> u8 {
        self.unit_id.unwrap_or(match self.transport {
            TransportConfig::Serial { .. } => DEFAULT_SERIAL_UNIT_ID,
            TransportConfig::Network { .. } => tcp::DEFAULT_UNIT_ID,
        })
    }

    pub fn transport_kind(&self) -> &'static str {
        match self.transport {
            TransportConfig::Serial { .. } => "RTU",
            TransportConfig::Network { .. } => "TCP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_defaults_follow_transport() {
        assert_eq!(DriverConfig::serial("/dev/ttyUSB0", 9600).effective_unit_id(), 1);
        assert_eq!(DriverConfig::network("192.168.1.50", 502).effective_unit_id(), 255);
        assert_eq!(
            DriverConfig::network("192.168.1.50", 502)
                .with_unit_id(3)
                .effective_unit_id(),
            3
        );
    }

    #[test]
    fn builder_overrides() {
        let config = DriverConfig::serial("/dev/ttyAMA0", 19200)
            .with_profile(1)
            .with_poll_interval_ms(2500);
        assert_eq!(config.profile_index, 1);
        assert_eq!(config.poll_interval_ms, 2500);
        assert_eq!(config.transport_kind(), "RTU");
    }
}
