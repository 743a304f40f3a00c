use chrono::{DateTime, Utc};
use std::time::Duration;

/// 读数有效性。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingStatus {
    Valid,
    Invalid,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "Valid",
            Self::Invalid => "Invalid",
        }
    }
}

/// 规范化后的传感器读数。
///
/// 采集器产出、队列传递、发布器消费的统一事件形态。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor_id: String,
    /// `None` 表示本周期没有可用值。
    pub value: Option<f64>,
    pub unit: String,
    pub status: ReadingStatus,
    /// 采集时刻（UTC）。
    pub timestamp: DateTime<Utc>,
    /// 为空时该读数永不发布。
    pub topic_suffix: Option<String>,
    pub change_threshold: f64,
    pub min_publish_interval: Option<Duration>,
}

impl Reading {
    pub fn is_valid(&self) -> bool {
        self.status == ReadingStatus::Valid
    }

    /// 可参与变化比较的值：`Invalid` 状态下即使有数值也视为不可用。
    pub fn usable_value(&self) -> Option<f64> {
        match self.status {
            ReadingStatus::Valid => self.value,
            ReadingStatus::Invalid => None,
        }
    }
}
