//! 发布器：连接管理、发布判定与状态维护。

use crate::client::{BrokerClient, MqttBrokerClient};
use crate::config::MqttPublisherConfig;
use crate::payload::{OFFLINE_GRACEFUL, format_payload, status_topic};
use chrono::{DateTime, Utc};
use domain::Reading;
use gw_pipeline::PublishStates;
use gw_telemetry::{
    record_publish_failure, record_reading_dropped, record_reading_published,
    record_reading_suppressed,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 单条读数的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 已发送，附带触发原因
    Published(&'static str),
    /// 判定为无需发送
    Suppressed,
    /// 无主题、未启动或未连接，直接丢弃
    Dropped,
    /// 发送失败，读数丢弃，不重试
    Failed,
}

/// MQTT 发布器
///
/// 发布状态只由单一消费任务修改，因此用普通 map 即可。
pub struct Publisher {
    config: MqttPublisherConfig,
    client: Option<Box<dyn BrokerClient>>,
    states: PublishStates,
    running: bool,
}

impl Publisher {
    pub fn new(config: MqttPublisherConfig) -> Self {
        Self {
            config,
            client: None,
            states: PublishStates::new(),
            running: false,
        }
    }

    /// 使用指定客户端创建发布器
    pub fn with_client(config: MqttPublisherConfig, client: Box<dyn BrokerClient>) -> Self {
        Self {
            client: Some(client),
            ..Self::new(config)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|client| client.is_connected())
    }

    pub fn states(&self) -> &PublishStates {
        &self.states
    }

    /// 启动：建立 Broker 连接（连接在后台完成，之后的重连交给客户端自身）。
    pub fn start(&mut self) {
        if !self.config.enabled {
            info!(target: "gw.publish", "mqtt publisher disabled by configuration");
            return;
        }
        if self.client.is_none() {
            self.client = Some(Box::new(MqttBrokerClient::connect(&self.config)));
        }
        self.running = true;
        info!(target: "gw.publish", topic_prefix = %self.config.topic_prefix, "mqtt publisher started");
    }

    /// 在限定时间内等待首次连接。
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn publish(&mut self, reading: &Reading) -> PublishOutcome {
        self.publish_at(reading, Utc::now()).await
    }

    /// 以给定的当前时刻处理一条读数。
    pub async fn publish_at(&mut self, reading: &Reading, now: DateTime<Utc>) -> PublishOutcome {
        let Some(suffix) = reading.topic_suffix.as_deref() else {
            record_reading_dropped();
            return PublishOutcome::Dropped;
        };
        if !self.config.enabled || !self.running {
            record_reading_dropped();
            return PublishOutcome::Dropped;
        }
        let Some(client) = self.client.as_mut().filter(|client| client.is_connected()) else {
            record_reading_dropped();
            debug!(target: "gw.publish", sensor_id = %reading.sensor_id, "broker not connected, reading dropped");
            return PublishOutcome::Dropped;
        };

        let decision =
            self.states
                .evaluate(reading, self.config.default_min_publish_interval(), now);
        if !decision.should_publish() {
            record_reading_suppressed();
            return PublishOutcome::Suppressed;
        }

        let topic = self.config.topic_for(suffix);
        let payload = format_payload(reading, &self.config.timestamp_format);
        match client.publish(&topic, payload.clone(), false).await {
            Ok(()) => {
                self.states.record(reading, now);
                record_reading_published();
                debug!(
                    target: "gw.publish",
                    sensor_id = %reading.sensor_id,
                    topic = %topic,
                    payload = %payload,
                    reason = decision.reason(),
                    "reading published"
                );
                PublishOutcome::Published(decision.reason())
            }
            Err(err) => {
                record_publish_failure();
                warn!(
                    target: "gw.publish",
                    sensor_id = %reading.sensor_id,
                    topic = %topic,
                    error = %err,
                    "publish failed"
                );
                PublishOutcome::Failed
            }
        }
    }

    /// 停止：发布 `offline_graceful`（保留）后断开。
    pub async fn stop(&mut self) {
        self.running = false;
        let Some(mut client) = self.client.take() else {
            return;
        };

        let topic = status_topic(&self.config.topic_prefix);
        if let Err(err) = client.publish(&topic, OFFLINE_GRACEFUL.to_string(), true).await {
            warn!(target: "gw.publish", error = %err, "offline status publish failed");
        }
        if let Err(err) = client.disconnect().await {
            warn!(target: "gw.publish", error = %err, "mqtt disconnect failed");
        }
        info!(target: "gw.publish", "mqtt publisher stopped");
    }
}
