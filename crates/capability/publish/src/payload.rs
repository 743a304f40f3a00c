//! 载荷与标识格式化

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone, Utc};
use domain::Reading;
use std::fmt::Write;

/// 状态主题后缀
pub const STATUS_TOPIC: &str = "gateway_status";

/// 正常停止时发布到状态主题的载荷
pub const OFFLINE_GRACEFUL: &str = "offline_graceful";

const NOT_AVAILABLE: &str = "N/A";

pub fn status_topic(topic_prefix: &str) -> String {
    format!("{}/{}", topic_prefix.trim_end_matches('/'), STATUS_TOPIC)
}

/// 生成 client id：`<prefix>-<ddmmyy>-<8 位随机十六进制>`。
pub fn generate_client_id(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        prefix.trim(),
        now.format("%d%m%y"),
        &suffix[..8]
    )
}

/// 校验 strftime 格式串。
pub fn validate_timestamp_format(format: &str) -> Result<(), String> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid timestamp format: {:?}", format));
    }
    Ok(())
}

/// 按 UTC 渲染时间戳；格式串无效时回退到 RFC 3339。
pub fn format_timestamp<Tz: TimeZone>(timestamp: &DateTime<Tz>, format: &str) -> String {
    let utc = timestamp.with_timezone(&Utc);
    let mut rendered = String::new();
    match write!(rendered, "{}", utc.format(format)) {
        Ok(()) => rendered,
        Err(_) => utc.to_rfc3339(),
    }
}

/// 三段式载荷：`<值+单位|N/A>, <Valid|Invalid>, <时间戳>`。
pub fn format_payload(reading: &Reading, timestamp_format: &str) -> String {
    let value = match reading.value {
        Some(value) => format!("{:.1}{}", value, reading.unit),
        None => NOT_AVAILABLE.to_string(),
    };
    let status = if reading.is_valid() && reading.value.is_some() {
        "Valid"
    } else {
        "Invalid"
    };
    format!(
        "{}, {}, {}",
        value,
        status,
        format_timestamp(&reading.timestamp, timestamp_format)
    )
}
