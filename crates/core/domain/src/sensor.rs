use crate::data::{Reading, ReadingStatus};
use chrono::Utc;
use std::fmt;
use std::time::Duration;

/// 采集器类型（闭集）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorFamily {
    ModbusTcp,
    Nmea,
}

impl CollectorFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "modbus_tcp",
            Self::Nmea => "nmea",
        }
    }
}

impl fmt::Display for CollectorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modbus 寄存器数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterDataType {
    /// 16位有符号整数
    Int16,
    /// 16位无符号整数（原始寄存器值）
    #[default]
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
}

impl RegisterDataType {
    /// 该类型至少需要的寄存器数量。
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }
}

/// Modbus 传感器参数；未设置的字段回落到采集器级默认值。
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusSensorParams {
    pub register_address: u16,
    pub unit_id: Option<u8>,
    pub polling_interval: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub data_type: RegisterDataType,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
}

impl ModbusSensorParams {
    pub fn new(register_address: u16) -> Self {
        Self {
            register_address,
            unit_id: None,
            polling_interval: None,
            read_timeout: None,
            data_type: RegisterDataType::default(),
            scale: None,
            offset: None,
        }
    }
}

/// NMEA 传感器参数：按 talker + 语句类型订阅。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaSensorParams {
    pub expected_talker_id: String,
    pub expected_sentence_type: String,
    /// 取值字段下标（不含地址字段）。
    pub value_field: usize,
}

/// 协议参数的标记联合，配置加载时一次性校验。
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorParams {
    ModbusTcp(ModbusSensorParams),
    Nmea(NmeaSensorParams),
}

impl CollectorParams {
    pub fn family(&self) -> CollectorFamily {
        match self {
            Self::ModbusTcp(_) => CollectorFamily::ModbusTcp,
            Self::Nmea(_) => CollectorFamily::Nmea,
        }
    }
}

/// 发布参数。
#[derive(Debug, Clone, PartialEq)]
pub struct PublishParams {
    pub topic_suffix: Option<String>,
    pub unit: String,
    pub change_threshold: f64,
    pub min_publish_interval: Option<Duration>,
}

/// 单个传感器的不可变配置。
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub id: String,
    pub name: String,
    pub collector: CollectorParams,
    pub publish: PublishParams,
}

impl SensorSpec {
    pub fn family(&self) -> CollectorFamily {
        self.collector.family()
    }

    /// 以当前时刻构造该传感器的读数。
    pub fn reading(&self, value: Option<f64>, status: ReadingStatus) -> Reading {
        Reading {
            sensor_id: self.id.clone(),
            value,
            unit: self.publish.unit.clone(),
            status,
            timestamp: Utc::now(),
            topic_suffix: self.publish.topic_suffix.clone(),
            change_threshold: self.publish.change_threshold,
            min_publish_interval: self.publish.min_publish_interval,
        }
    }

    pub fn valid_reading(&self, value: f64) -> Reading {
        self.reading(Some(value), ReadingStatus::Valid)
    }

    pub fn invalid_reading(&self) -> Reading {
        self.reading(None, ReadingStatus::Invalid)
    }
}
