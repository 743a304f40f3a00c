//! 网关运行配置加载。
//!
//! 配置来源按优先级：
//! 1. 环境变量覆盖（Broker 地址、凭据、日志级别）
//! 2. `GATEWAY_CONFIG` 指定的文件，否则 `config/gateway.toml`，再否则 `config/gateway.default.toml`
//!
//! 加载即校验，任何错误都会中止启动。

mod env;
mod sensor;

use gw_protocol::{ModbusTcpConfig, NmeaTcpConfig};
use gw_publish::{MqttPublisherConfig, validate_timestamp_format};
use sensor::RawSensor;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub use domain::SensorSpec;

/// 用户配置文件路径
pub const USER_CONFIG_PATH: &str = "config/gateway.toml";
/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/gateway.default.toml";

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration file found (tried {0})")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// 采集器级配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default)]
    pub modbus_tcp: ModbusTcpConfig,
    #[serde(default)]
    pub nmea: NmeaTcpConfig,
}

#[derive(Debug, Deserialize)]
struct RawAppConfig {
    #[serde(default = "default_application_name")]
    application_name: String,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    collectors: CollectorsConfig,
    #[serde(default)]
    mqtt_publisher: MqttPublisherConfig,
    #[serde(default)]
    sensors: Vec<RawSensor>,
}

fn default_application_name() -> String {
    "sensor-gateway".to_string()
}

/// 网关运行配置（加载后不可变）。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub application_name: String,
    pub logging: LoggingConfig,
    pub collectors: CollectorsConfig,
    pub mqtt_publisher: MqttPublisherConfig,
    pub sensors: Vec<SensorSpec>,
}

impl AppConfig {
    /// 解析配置文件路径、读取、叠加环境变量并校验。
    pub fn load() -> Result<Self, ConfigError> {
        let path = resolve_config_path()?;
        tracing::info!(target: "gw.gateway", path = %path.display(), "loading configuration");
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 解析 TOML 文本（含传感器参数变体解码与校验）。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawAppConfig =
            toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let sensors = raw
            .sensors
            .into_iter()
            .map(RawSensor::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        let config = Self {
            application_name: raw.application_name,
            logging: raw.logging,
            collectors: raw.collectors,
            mqtt_publisher: raw.mqtt_publisher,
            sensors,
        };
        config.validate()?;
        Ok(config)
    }

    /// 环境变量覆盖 Broker 地址、凭据与日志级别。
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(host) = env::read_optional("GATEWAY_MQTT_HOST") {
            self.mqtt_publisher.broker_host = host;
        }
        if let Some(port) = env::read_u16("GATEWAY_MQTT_PORT")? {
            self.mqtt_publisher.broker_port = port;
        }
        if let Some(username) = env::read_optional("GATEWAY_MQTT_USERNAME") {
            self.mqtt_publisher.username = Some(username);
        }
        if let Some(password) = env::read_optional("GATEWAY_MQTT_PASSWORD") {
            self.mqtt_publisher.password = Some(password);
        }
        if let Some(level) = env::read_optional("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate sensor id: {}",
                    sensor.id
                )));
            }
        }

        let modbus = &self.collectors.modbus_tcp;
        require_positive("collectors.modbus_tcp.poll_interval_ms", modbus.poll_interval_ms)?;
        require_positive("collectors.modbus_tcp.read_timeout_ms", modbus.read_timeout_ms)?;
        require_positive("collectors.modbus_tcp.connect_timeout_ms", modbus.connect_timeout_ms)?;
        require_positive("collectors.modbus_tcp.retry_delay_ms", modbus.retry_delay_ms)?;
        let nmea = &self.collectors.nmea;
        require_positive("collectors.nmea.connect_timeout_ms", nmea.connect_timeout_ms)?;
        require_positive("collectors.nmea.retry_delay_ms", nmea.retry_delay_ms)?;

        let mqtt = &self.mqtt_publisher;
        if mqtt.keepalive_seconds < 60 {
            return Err(ConfigError::Validation(format!(
                "mqtt_publisher.keepalive_seconds must be >= 60, got {}",
                mqtt.keepalive_seconds
            )));
        }
        require_positive(
            "mqtt_publisher.default_min_publish_interval_seconds",
            mqtt.default_min_publish_interval_seconds,
        )?;
        if mqtt.topic_prefix.trim_matches('/').trim().is_empty() {
            return Err(ConfigError::Validation(
                "mqtt_publisher.topic_prefix must not be empty".to_string(),
            ));
        }
        if mqtt.client_id_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mqtt_publisher.client_id_prefix must not be empty".to_string(),
            ));
        }
        validate_timestamp_format(&mqtt.timestamp_format).map_err(ConfigError::Validation)?;
        Ok(())
    }
}

fn require_positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!("{} must be > 0", key)));
    }
    Ok(())
}

/// 按 `GATEWAY_CONFIG` → 用户配置 → 默认配置的顺序查找配置文件。
pub fn resolve_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env::read_optional("GATEWAY_CONFIG") {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    [USER_CONFIG_PATH, DEFAULT_CONFIG_PATH]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ConfigError::NotFound(format!("{}, {}", USER_CONFIG_PATH, DEFAULT_CONFIG_PATH))
        })
}
