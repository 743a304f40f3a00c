//! Broker 客户端抽象与 rumqttc 实现。

use crate::PublishError;
use crate::config::MqttPublisherConfig;
use crate::payload::{generate_client_id, status_topic};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 请求入队等待上限；Broker 长时间不可用时避免阻塞消费任务。
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// 断开后等待事件循环退出的上限。
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Broker 客户端（发布边界）。所有消息均为 QoS 1（至少一次）。
#[async_trait]
pub trait BrokerClient: Send {
    fn is_connected(&self) -> bool;

    async fn publish(&mut self, topic: &str, payload: String, retain: bool)
    -> Result<(), PublishError>;

    async fn disconnect(&mut self) -> Result<(), PublishError>;
}

/// 基于 rumqttc 的 MQTT 客户端。
///
/// 事件循环在后台任务中持续 poll：出错后休眠 1 秒继续，rumqttc 会在下一次 poll 时重连，
/// 连接状态由 ConnAck 与错误事件维护。
pub struct MqttBrokerClient {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    eventloop: Option<JoinHandle<()>>,
}

impl MqttBrokerClient {
    /// 创建客户端并启动事件循环；LWT 预先设置在状态主题上（保留）。
    pub fn connect(config: &MqttPublisherConfig) -> Self {
        let client_id = generate_client_id(&config.client_id_prefix, Utc::now());
        let mut options = MqttOptions::new(
            client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(config.keepalive());
        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }
        options.set_last_will(LastWill::new(
            status_topic(&config.topic_prefix),
            config.lwt_message.clone(),
            QoS::AtLeastOnce,
            true,
        ));

        info!(
            target: "gw.publish",
            client_id = %client_id,
            broker = %format!("{}:{}", config.broker_host, config.broker_port),
            "mqtt connecting"
        );

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();
        let broker_host = config.broker_host.clone();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            flag.store(true, Ordering::Release);
                            info!(target: "gw.publish", broker = %broker_host, "mqtt connected");
                        } else {
                            flag.store(false, Ordering::Release);
                            error!(target: "gw.publish", code = ?ack.code, "mqtt connection refused");
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        flag.store(false, Ordering::Release);
                        debug!(target: "gw.publish", "mqtt disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if flag.swap(false, Ordering::AcqRel) {
                            warn!(target: "gw.publish", error = %err, "mqtt disconnected, will auto-reconnect");
                        } else {
                            warn!(target: "gw.publish", error = %err, "mqtt eventloop error");
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            connected,
            eventloop: Some(handle),
        }
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> Result<(), PublishError> {
        tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.client.publish(topic, QoS::AtLeastOnce, retain, payload),
        )
        .await
        .map_err(|_| PublishError::Timeout(topic.to_string()))?
        .map_err(|err| PublishError::Client(err.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), PublishError> {
        let result = tokio::time::timeout(REQUEST_TIMEOUT, self.client.disconnect())
            .await
            .map_err(|_| PublishError::Timeout("disconnect".to_string()))
            .and_then(|sent| sent.map_err(|err| PublishError::Client(err.to_string())));

        if let Some(mut handle) = self.eventloop.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        self.connected.store(false, Ordering::Release);
        result
    }
}
