//! # 发布能力模块
//!
//! 从采集队列消费读数，按传感器维护发布状态，决定是否发送到 MQTT Broker。
//!
//! ## 主题与载荷
//!
//! - 读数主题：`<topic_prefix>/<topic_suffix>`，QoS 1，不保留
//! - 状态主题：`<topic_prefix>/gateway_status`，保留；
//!   LWT 为 `lwt_message`，正常停止时发布 `offline_graceful`
//! - 载荷：`<值+单位|N/A>, <Valid|Invalid>, <时间戳>`，例如 `10.5m, Valid, 2024-05-01 at 12:00 UTC`
//!
//! ## 组件
//!
//! ```text
//! Reading ──▶ Publisher ──(PublishStates 判定)──▶ BrokerClient
//!                                                   └── MqttBrokerClient (rumqttc)
//! ```

mod client;
mod config;
mod payload;
mod publisher;

pub use client::{BrokerClient, MqttBrokerClient};
pub use config::MqttPublisherConfig;
pub use payload::{
    OFFLINE_GRACEFUL, STATUS_TOPIC, format_payload, format_timestamp, generate_client_id,
    status_topic, validate_timestamp_format,
};
pub use publisher::{PublishOutcome, Publisher};

/// 发布错误
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// 客户端请求失败（请求队列关闭或已满）
    #[error("mqtt client error: {0}")]
    Client(String),

    /// 发布请求超时
    #[error("mqtt request timed out: {0}")]
    Timeout(String),

    /// 未连接到 Broker
    #[error("not connected to broker")]
    NotConnected,
}
