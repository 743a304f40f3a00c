//! 传感器配置：TOML 原始结构到 `SensorSpec` 的转换。
//!
//! `collector_config` 先按原始 TOML 值保存，再按 `collector_type` 解码为对应变体，
//! 字段不匹配即为配置错误。

use crate::ConfigError;
use domain::{
    CollectorParams, ModbusSensorParams, NmeaSensorParams, PublishParams, RegisterDataType,
    SensorSpec,
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CollectorType {
    ModbusTcp,
    Nmea,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DataType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl From<DataType> for RegisterDataType {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Int16 => Self::Int16,
            DataType::Uint16 => Self::Uint16,
            DataType::Int32 => Self::Int32,
            DataType::Uint32 => Self::Uint32,
            DataType::Float32 => Self::Float32,
            DataType::Float64 => Self::Float64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModbusParams {
    register_address: u16,
    #[serde(default)]
    unit_id: Option<u8>,
    #[serde(default)]
    polling_interval_ms: Option<u64>,
    #[serde(default)]
    read_timeout_ms: Option<u64>,
    #[serde(default)]
    data_type: Option<DataType>,
    #[serde(default)]
    scale: Option<f64>,
    #[serde(default)]
    offset: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNmeaParams {
    expected_talker_id: String,
    expected_sentence_type: String,
    #[serde(default)]
    value_field: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPublisherParams {
    #[serde(default)]
    mqtt_topic_suffix: Option<String>,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    change_threshold: f64,
    #[serde(default)]
    min_publish_interval_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSensor {
    id: String,
    #[serde(default)]
    name: Option<String>,
    collector_type: CollectorType,
    collector_config: toml::Value,
    publisher_config: RawPublisherParams,
}

impl RawSensor {
    pub(crate) fn into_spec(self) -> Result<SensorSpec, ConfigError> {
        let id = self.id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::Validation("sensor id must not be empty".to_string()));
        }
        let invalid = |reason: String| ConfigError::Validation(format!("sensor {}: {}", id, reason));

        let collector = match self.collector_type {
            CollectorType::ModbusTcp => {
                let raw = self
                    .collector_config
                    .try_into::<RawModbusParams>()
                    .map_err(|err| invalid(format!("modbus_tcp collector_config: {}", err)))?;
                CollectorParams::ModbusTcp(ModbusSensorParams {
                    register_address: raw.register_address,
                    unit_id: raw.unit_id,
                    polling_interval: positive_millis(raw.polling_interval_ms, "polling_interval_ms")
                        .map_err(&invalid)?,
                    read_timeout: positive_millis(raw.read_timeout_ms, "read_timeout_ms")
                        .map_err(&invalid)?,
                    data_type: raw.data_type.map(Into::into).unwrap_or_default(),
                    scale: raw.scale,
                    offset: raw.offset,
                })
            }
            CollectorType::Nmea => {
                let raw = self
                    .collector_config
                    .try_into::<RawNmeaParams>()
                    .map_err(|err| invalid(format!("nmea collector_config: {}", err)))?;
                if raw.expected_talker_id.trim().is_empty()
                    || raw.expected_sentence_type.trim().is_empty()
                {
                    return Err(invalid(
                        "expected_talker_id and expected_sentence_type are required".to_string(),
                    ));
                }
                CollectorParams::Nmea(NmeaSensorParams {
                    expected_talker_id: raw.expected_talker_id.trim().to_ascii_uppercase(),
                    expected_sentence_type: raw.expected_sentence_type.trim().to_ascii_uppercase(),
                    value_field: raw.value_field,
                })
            }
        };

        let publisher = self.publisher_config;
        if !publisher.change_threshold.is_finite() || publisher.change_threshold < 0.0 {
            return Err(invalid(format!(
                "change_threshold must be >= 0, got {}",
                publisher.change_threshold
            )));
        }
        let min_publish_interval = match publisher.min_publish_interval_seconds {
            Some(0) => return Err(invalid("min_publish_interval_seconds must be > 0".to_string())),
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => None,
        };

        Ok(SensorSpec {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            collector,
            publish: PublishParams {
                topic_suffix: publisher
                    .mqtt_topic_suffix
                    .filter(|suffix| !suffix.trim().is_empty()),
                unit: publisher.unit,
                change_threshold: publisher.change_threshold,
                min_publish_interval,
            },
        })
    }
}

fn positive_millis(value: Option<u64>, field: &str) -> Result<Option<Duration>, String> {
    match value {
        Some(0) => Err(format!("{} must be > 0", field)),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}
