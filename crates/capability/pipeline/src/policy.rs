//! 发布判定策略。
//!
//! 判定只依赖 `(reading, 上次发布状态, 默认间隔, now)`，不读取系统时钟。

use chrono::{DateTime, Utc};
use domain::Reading;
use std::collections::HashMap;
use std::time::Duration;

/// 传感器上次成功发布的状态。
#[derive(Debug, Clone, PartialEq)]
pub struct PublishState {
    pub last_value: Option<f64>,
    pub last_published_at: DateTime<Utc>,
}

/// 发布判定结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishDecision {
    pub changed: bool,
    pub interval_elapsed: bool,
    pub first_message: bool,
}

impl PublishDecision {
    pub fn should_publish(&self) -> bool {
        self.changed || self.interval_elapsed || self.first_message
    }

    /// 日志用的触发原因。
    pub fn reason(&self) -> &'static str {
        if self.first_message {
            "first_message"
        } else if self.changed {
            "changed"
        } else if self.interval_elapsed {
            "interval_elapsed"
        } else {
            "suppressed"
        }
    }
}

/// 计算单条读数的发布判定。
///
/// - changed：有效读数且（无上次值或变化量超过阈值），或无效读数且存在上次值
/// - interval_elapsed：`now - 上次发布时刻 >= 读数间隔（缺省用 default_interval）`，
///   无上次状态时以 Unix 纪元为上次发布时刻
/// - first_message：该传感器尚无发布状态
pub fn evaluate(
    reading: &Reading,
    prior: Option<&PublishState>,
    default_interval: Duration,
    now: DateTime<Utc>,
) -> PublishDecision {
    let last_value = prior.and_then(|state| state.last_value);
    let last_time = prior
        .map(|state| state.last_published_at)
        .unwrap_or_default();

    let changed = match reading.usable_value() {
        Some(value) => match last_value {
            None => true,
            Some(last) => (value - last).abs() > reading.change_threshold,
        },
        None => !reading.is_valid() && last_value.is_some(),
    };

    let interval = reading.min_publish_interval.unwrap_or(default_interval);
    let interval_elapsed = match now.signed_duration_since(last_time).to_std() {
        Ok(elapsed) => elapsed >= interval,
        Err(_) => false,
    };

    PublishDecision {
        changed,
        interval_elapsed,
        first_message: prior.is_none(),
    }
}

/// 按 sensor_id 维护的发布状态表，仅由单一消费任务修改。
#[derive(Debug, Default)]
pub struct PublishStates {
    states: HashMap<String, PublishState>,
}

impl PublishStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sensor_id: &str) -> Option<&PublishState> {
        self.states.get(sensor_id)
    }

    pub fn evaluate(
        &self,
        reading: &Reading,
        default_interval: Duration,
        now: DateTime<Utc>,
    ) -> PublishDecision {
        evaluate(reading, self.get(&reading.sensor_id), default_interval, now)
    }

    /// 发布成功后记录读数本身的值（即使为 `None` 或由间隔触发）。
    pub fn record(&mut self, reading: &Reading, now: DateTime<Utc>) {
        self.states.insert(
            reading.sensor_id.clone(),
            PublishState {
                last_value: reading.value,
                last_published_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
