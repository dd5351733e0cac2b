//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// How the portal is wired to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Local serial port
    Serial,
    /// Serial-to-Ethernet converter
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique portal identifier, stamped on every published message
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "rpm".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub mode: SourceMode,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_tcp_addr")]
    pub tcp_addr: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Longest accepted line; a longer one means framing is lost
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    9600
}

fn default_tcp_addr() -> String {
    "127.0.0.1:4001".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_max_line_len() -> usize {
    crate::io::framer::DEFAULT_MAX_LINE_LEN
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing; events are only logged otherwise
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Prefix for the per-kind topics (`<prefix>/gamma`, `<prefix>/occupancy`, ...)
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            topic_prefix: default_topic_prefix(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_topic_prefix() -> String {
    "rpm".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub source: SourceConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    source_mode: SourceMode,
    serial_device: String,
    serial_baud: u32,
    tcp_addr: String,
    connect_timeout_ms: u64,
    reconnect_delay_ms: u64,
    max_line_len: usize,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_egress_enabled: bool,
    mqtt_topic_prefix: String,
    mqtt_egress_metrics_interval_secs: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            source_mode: SourceMode::Serial,
            serial_device: default_device(),
            serial_baud: default_baud(),
            tcp_addr: default_tcp_addr(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_line_len: default_max_line_len(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_egress_enabled: default_mqtt_egress_enabled(),
            mqtt_topic_prefix: default_topic_prefix(),
            mqtt_egress_metrics_interval_secs: default_metrics_publish_interval(),
            metrics_interval_secs: 10,
            prometheus_port: default_prometheus_port(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.source.max_line_len == 0 {
            anyhow::bail!("source.max_line_len must be positive in {}", path.display());
        }

        Ok(Self {
            site_id: toml_config.site.id,
            source_mode: toml_config.source.mode,
            serial_device: toml_config.source.device,
            serial_baud: toml_config.source.baud,
            tcp_addr: toml_config.source.tcp_addr,
            connect_timeout_ms: toml_config.source.connect_timeout_ms,
            reconnect_delay_ms: toml_config.source.reconnect_delay_ms,
            max_line_len: toml_config.source.max_line_len,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_topic_prefix: toml_config.mqtt_egress.topic_prefix,
            mqtt_egress_metrics_interval_secs: toml_config
                .mqtt_egress
                .metrics_publish_interval_secs,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn source_mode(&self) -> SourceMode {
        self.source_mode
    }

    pub fn serial_device(&self) -> &str {
        &self.serial_device
    }

    pub fn serial_baud(&self) -> u32 {
        self.serial_baud
    }

    pub fn tcp_addr(&self) -> &str {
        &self.tcp_addr
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Human-readable source description for logs
    pub fn source_description(&self) -> String {
        match self.source_mode {
            SourceMode::Serial => format!("serial:{}@{}", self.serial_device, self.serial_baud),
            SourceMode::Tcp => format!("tcp:{}", self.tcp_addr),
        }
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_topic_prefix(&self) -> &str {
        &self.mqtt_topic_prefix
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress_metrics_interval_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to read from a TCP source
    #[cfg(test)]
    pub fn with_tcp_source(mut self, addr: &str) -> Self {
        self.source_mode = SourceMode::Tcp;
        self.tcp_addr = addr.to_string();
        self.connect_timeout_ms = 1000;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "rpm");
        assert_eq!(config.source_mode(), SourceMode::Serial);
        assert_eq!(config.serial_baud(), 9600);
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_topic_prefix(), "rpm");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.max_line_len(), 1024);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["rpm-gateway".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "rpm-gateway".to_string(),
            "--config".to_string(),
            "config/lane2.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/lane2.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["rpm-gateway".to_string(), "--config=config/lane3.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/lane3.toml");
    }

    #[test]
    fn test_source_description() {
        let config = Config::default().with_tcp_source("10.0.0.5:4001");
        assert_eq!(config.source_description(), "tcp:10.0.0.5:4001");
        assert_eq!(Config::default().source_description(), "serial:/dev/ttyUSB0@9600");
    }

    #[test]
    fn test_mqtt_egress_default() {
        let egress = MqttEgressConfig::default();
        assert!(egress.enabled);
        assert_eq!(egress.topic_prefix, "rpm");
        assert_eq!(egress.metrics_publish_interval_secs, 5);
    }
}
