use std::time::Duration;

use ads::{AmsNetId, AmsPort};
use log::LevelFilter;
use serde::Deserialize;

use crate::{Error, Result};

fn default_port() -> AmsPort {
    801
}

fn default_host_ams() -> String {
    "auto".to_owned()
}

fn default_cycle_time() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    100
}

fn default_interval_time() -> u64 {
    1000
}

fn default_timeout() -> u64 {
    10
}

fn default_tcp_port() -> u16 {
    ads::AMS_TCP_PORT
}

/// Connector settings, immutable for the lifetime of an `AdsInput`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "targetIP")]
    pub target_ip: String,
    #[serde(rename = "targetAMS")]
    pub target_ams: String,
    /// AMS port of the PLC runtime (801 for TwinCAT 2, 851 for TwinCAT 3).
    #[serde(default = "default_port")]
    pub port: AmsPort,
    /// Local AMS NetId, or `auto` to derive it from the local IPv4 address.
    #[serde(rename = "hostAMS", default = "default_host_ams")]
    pub host_ams: String,
    #[serde(default)]
    pub read_type: ReadType,
    /// Milliseconds. PLC sampling cycle for notifications.
    #[serde(default = "default_cycle_time")]
    pub cycle_time: u64,
    /// Milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
    /// Milliseconds between interval polls.
    #[serde(default = "default_interval_time")]
    pub interval_time: u64,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Seconds allowed for the TCP connect and for each request.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(rename = "tcpPort", default = "default_tcp_port")]
    pub tcp_port: u16,
}

#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReadType {
    #[default]
    Notification,
    Interval,
}

#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Panic,
    Fatal,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
    Disabled,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Panic | LogLevel::Fatal | LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Disabled => LevelFilter::Off,
        }
    }
}

/// The local AMS NetId to put in outbound headers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostAms {
    Auto,
    NetId(AmsNetId),
}

impl Config {
    /// A configuration with every optional field at its default.
    pub fn new<I, S>(target_ip: &str, target_ams: &str, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Config {
            target_ip: target_ip.to_owned(),
            target_ams: target_ams.to_owned(),
            port: default_port(),
            host_ams: default_host_ams(),
            read_type: ReadType::default(),
            cycle_time: default_cycle_time(),
            max_delay: default_max_delay(),
            interval_time: default_interval_time(),
            symbols: symbols.into_iter().map(Into::into).collect(),
            log_level: LogLevel::default(),
            timeout: default_timeout(),
            tcp_port: default_tcp_port(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|error| Error::config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_ip.trim().is_empty() {
            return Err(Error::config("targetIP must not be empty"));
        }
        self.target_net_id()?;
        self.host()?;
        if self.port == 0 {
            return Err(Error::config("port must be between 1 and 65535"));
        }
        if self.tcp_port == 0 {
            return Err(Error::config("tcpPort must be between 1 and 65535"));
        }
        if self.cycle_time == 0 {
            return Err(Error::config("cycleTime must be at least 1 ms"));
        }
        if self.interval_time == 0 {
            return Err(Error::config("intervalTime must be at least 1 ms"));
        }
        if self.timeout == 0 {
            return Err(Error::config("timeout must be at least 1 s"));
        }
        if self.symbols.is_empty() {
            return Err(Error::config("at least one symbol is required"));
        }
        if let Some(symbol) = self.symbols.iter().find(|symbol| symbol.trim().is_empty()) {
            return Err(Error::config(format!("invalid symbol name {:?}", symbol)));
        }
        Ok(())
    }

    pub fn target_net_id(&self) -> Result<AmsNetId> {
        self.target_ams
            .parse()
            .map_err(|_| Error::config(format!("invalid targetAMS {:?}", self.target_ams)))
    }

    pub fn host(&self) -> Result<HostAms> {
        if self.host_ams.eq_ignore_ascii_case("auto") {
            return Ok(HostAms::Auto);
        }
        self.host_ams
            .parse()
            .map(HostAms::NetId)
            .map_err(|_| Error::config(format!("invalid hostAMS {:?}", self.host_ams)))
    }

    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay)
    }

    pub fn interval_time(&self) -> Duration {
        Duration::from_millis(self.interval_time)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn applies_defaults() {
        let config = Config::from_json(
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "symbols": ["MAIN.flag"]}"#,
        )
        .unwrap();

        assert_eq!(config.port, 801);
        assert_eq!(config.host().unwrap(), HostAms::Auto);
        assert_eq!(config.read_type, ReadType::Notification);
        assert_eq!(config.cycle_time(), Duration::from_millis(1000));
        assert_eq!(config.max_delay(), Duration::from_millis(100));
        assert_eq!(config.interval_time(), Duration::from_millis(1000));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.tcp_port, 48898);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn parses_every_field() {
        let config = Config::from_json(
            r#"{
                "targetIP": "10.0.0.5",
                "targetAMS": "10.0.0.5.1.1",
                "port": 851,
                "hostAMS": "10.0.0.1.1.1",
                "readType": "interval",
                "cycleTime": 100,
                "maxDelay": 0,
                "intervalTime": 500,
                "symbols": ["MAIN.a", ".gb"],
                "logLevel": "disabled",
                "timeout": 2,
                "tcpPort": 4000
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 851);
        assert_eq!(
            config.host().unwrap(),
            HostAms::NetId(AmsNetId([10, 0, 0, 1, 1, 1]))
        );
        assert_eq!(config.read_type, ReadType::Interval);
        assert_eq!(config.max_delay, 0);
        assert_eq!(config.symbols, vec!["MAIN.a", ".gb"]);
        assert_eq!(LevelFilter::from(config.log_level), LevelFilter::Off);
        assert_eq!(config.tcp_port, 4000);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let cases = [
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "symbols": []}"#,
            r#"{"targetIP": "", "targetAMS": "10.0.0.5.1.1", "symbols": ["a"]}"#,
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5", "symbols": ["a"]}"#,
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "hostAMS": "x", "symbols": ["a"]}"#,
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "port": 0, "symbols": ["a"]}"#,
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "port": 70000, "symbols": ["a"]}"#,
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "cycleTime": 0, "symbols": ["a"]}"#,
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "maxDelay": -1, "symbols": ["a"]}"#,
            r#"{"targetIP": "10.0.0.5", "targetAMS": "10.0.0.5.1.1", "readType": "poll", "symbols": ["a"]}"#,
        ];

        for case in cases {
            let error = Config::from_json(case).unwrap_err();
            assert!(
                matches!(error.kind, ErrorKind::ConfigInvalid(_)),
                "{}: {}",
                case,
                error
            );
        }
    }

    #[test]
    fn maps_log_levels() {
        assert_eq!(LevelFilter::from(LogLevel::Panic), LevelFilter::Error);
        assert_eq!(LevelFilter::from(LogLevel::Fatal), LevelFilter::Error);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::Trace);
    }
}
