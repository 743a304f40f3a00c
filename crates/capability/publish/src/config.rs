//! MQTT 发布器配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// MQTT 发布器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttPublisherConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// client id 前缀，实际 id 为 `<prefix>-<ddmmyy>-<8 位随机十六进制>`
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// 心跳间隔（秒，>= 60）
    #[serde(default = "default_keepalive")]
    pub keepalive_seconds: u64,
    /// 传感器未指定时的最小发布间隔（秒，>= 1）
    #[serde(default = "default_min_publish_interval")]
    pub default_min_publish_interval_seconds: u64,
    #[serde(default = "default_lwt_message")]
    pub lwt_message: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// strftime 格式，按 UTC 渲染
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

fn default_enabled() -> bool {
    true
}

fn default_broker_host() -> String {
    "broker.hivemq.com".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "sensor-gateway".to_string()
}

fn default_keepalive() -> u64 {
    600
}

fn default_min_publish_interval() -> u64 {
    300
}

fn default_lwt_message() -> String {
    "connection lost".to_string()
}

fn default_topic_prefix() -> String {
    "sensor-gateway".to_string()
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d at %H:%M UTC".to_string()
}

impl Default for MqttPublisherConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            keepalive_seconds: default_keepalive(),
            default_min_publish_interval_seconds: default_min_publish_interval(),
            lwt_message: default_lwt_message(),
            topic_prefix: default_topic_prefix(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

impl MqttPublisherConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_seconds)
    }

    pub fn default_min_publish_interval(&self) -> Duration {
        Duration::from_secs(self.default_min_publish_interval_seconds)
    }

    /// 用户名与密码同时存在时才返回凭据。
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn topic_for(&self, suffix: &str) -> String {
        format!(
            "{}/{}",
            self.topic_prefix.trim_end_matches('/'),
            suffix.trim_start_matches('/')
        )
    }
}
