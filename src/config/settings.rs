use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};
use crate::dispatch::{DispatchSettings, DEFAULT_WORKERS};
use crate::transport::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationKind {
    Serial,
    Network,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    /// Seconds
    #[serde(default = "default_serial_timeout")]
    pub timeout: f64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: Some("COM1".to_string()),
            baud_rate: Some(115200),
            timeout: default_serial_timeout(),
        }
    }
}

fn default_serial_timeout() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub ip: Option<String>,
    pub port: Option<u16>,
    /// Seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ip: Some("192.168.1.100".to_string()),
            port: Some(5000),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> f64 {
    5.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationConfig {
    #[serde(rename = "type")]
    pub kind: CommunicationKind,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub network: NetworkSettings,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            kind: CommunicationKind::Network,
            serial: SerialSettings::default(),
            network: NetworkSettings::default(),
        }
    }
}

impl CommunicationConfig {
    /// Resolve the configured link, failing when the selected variant is incomplete
    pub fn endpoint(&self) -> Result<Endpoint> {
        match self.kind {
            CommunicationKind::Serial => {
                let port = self
                    .serial
                    .port
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| invalid("communication.serial.port is required"))?;
                let baud_rate = self
                    .serial
                    .baud_rate
                    .filter(|b| *b > 0)
                    .ok_or_else(|| invalid("communication.serial.baud_rate is required"))?;
                Ok(Endpoint::Serial {
                    port,
                    baud_rate,
                    timeout: seconds("communication.serial.timeout", self.serial.timeout)?,
                })
            }
            CommunicationKind::Network => {
                let host = self
                    .network
                    .ip
                    .clone()
                    .filter(|h| !h.trim().is_empty())
                    .ok_or_else(|| invalid("communication.network.ip is required"))?;
                let port = self
                    .network
                    .port
                    .filter(|p| *p > 0)
                    .ok_or_else(|| invalid("communication.network.port is required"))?;
                Ok(Endpoint::Network {
                    host,
                    port,
                    connect_timeout: seconds(
                        "communication.network.connect_timeout",
                        self.network.connect_timeout,
                    )?,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    pub ping_count: u32,
    /// Seconds per echo request
    pub ping_timeout: f64,
    /// Seconds between commands
    pub command_interval: f64,
    /// Seconds to wait for each reply
    pub response_timeout: f64,
    pub probe_enabled: bool,
    pub pipeline_workers: usize,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            ping_count: 4,
            ping_timeout: 1.0,
            command_interval: 0.5,
            response_timeout: 2.0,
            probe_enabled: true,
            pipeline_workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

/// Complete bench configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub communication: CommunicationConfig,
    #[serde(default)]
    pub test: TestSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl BenchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&text)?;
        log::info!("Loaded bench configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every value the run depends on
    pub fn validate(&self) -> Result<()> {
        self.communication.endpoint()?;
        self.ping_timeout()?;
        self.dispatch_settings()?;
        if self.test.probe_enabled && self.test.ping_count == 0 {
            return Err(invalid("test.ping_count must be at least 1"));
        }
        if self.test.pipeline_workers == 0 {
            return Err(invalid("test.pipeline_workers must be at least 1"));
        }
        if self.telemetry.enabled && self.telemetry.interval_ms == 0 {
            return Err(invalid("telemetry.interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn ping_timeout(&self) -> Result<Duration> {
        seconds("test.ping_timeout", self.test.ping_timeout)
    }

    pub fn response_timeout(&self) -> Result<Duration> {
        seconds("test.response_timeout", self.test.response_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.interval_ms.max(1))
    }

    pub fn dispatch_settings(&self) -> Result<DispatchSettings> {
        Ok(DispatchSettings {
            response_timeout: self.response_timeout()?,
            command_interval: seconds("test.command_interval", self.test.command_interval)?,
            ..DispatchSettings::default()
        })
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| invalid(&format!("{} must be a non-negative number of seconds", field)))
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bench() {
        let config = BenchConfig::default();
        assert_eq!(config.communication.kind, CommunicationKind::Network);
        assert_eq!(
            config.communication.endpoint().unwrap(),
            Endpoint::Network {
                host: "192.168.1.100".into(),
                port: 5000,
                connect_timeout: Duration::from_secs(5),
            }
        );
        assert_eq!(config.test.ping_count, 4);
        let dispatch = config.dispatch_settings().unwrap();
        assert_eq!(dispatch.command_interval, Duration::from_millis(500));
        assert_eq!(dispatch.response_timeout, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_serial_yaml() {
        let yaml = r#"
communication:
  type: serial
  serial:
    port: /dev/ttyUSB0
    baud_rate: 9600
    timeout: 0.5
test:
  ping_count: 2
  command_interval: 0.1
"#;
        let config = BenchConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.communication.endpoint().unwrap(),
            Endpoint::Serial {
                port: "/dev/ttyUSB0".into(),
                baud_rate: 9600,
                timeout: Duration::from_millis(500),
            }
        );
        assert_eq!(config.test.ping_count, 2);
        assert_eq!(config.test.response_timeout, 2.0);
        assert!(config.telemetry.enabled);
    }

    #[test]
    fn missing_port_is_invalid() {
        let yaml = r#"
communication:
  type: serial
  serial:
    baud_rate: 9600
"#;
        let config = BenchConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("serial.port")));
    }

    #[test]
    fn negative_interval_is_invalid() {
        let mut config = BenchConfig::default();
        config.test.command_interval = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn yaml_round_trip_keeps_values() {
        let mut config = BenchConfig::default();
        config.communication.network.ip = Some("10.1.2.3".into());
        config.telemetry.enabled = false;
        let text = config.to_yaml_string().unwrap();
        assert_eq!(BenchConfig::from_yaml_str(&text).unwrap(), config);
    }
}
