//! NMEA TCP 流式采集器
//!
//! 维持一条到 NMEA 文本流的 TCP 连接，逐行解析，并按 talker + 语句类型
//! 分发给订阅该语句的传感器。对端关闭或任何错误后，固定间隔重连，直到停止。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let mut collector = NmeaCollector::new(NmeaTcpConfig::default());
//! collector.start(&sensors, sink).await?;
//! ```

use crate::collector::Collector;
use crate::error::ProtocolError;
use crate::nmea::{Sentence, SentenceKey, parse_sentence};
use async_trait::async_trait;
use domain::{CollectorFamily, CollectorParams, Reading, SensorSpec};
use gw_pipeline::ReadingSink;
use gw_telemetry::{
    record_collector_connect, record_collector_connect_failure, record_stream_line,
    record_stream_parse_error,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// NMEA TCP 采集器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmeaTcpConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 数据源主机地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 数据源端口
    #[serde(default = "default_nmea_port")]
    pub port: u16,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 重连间隔（毫秒）
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_nmea_port() -> u16 {
    8888
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_retry_delay() -> u64 {
    5000
}

impl Default for NmeaTcpConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_nmea_port(),
            connect_timeout_ms: default_connect_timeout(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl NmeaTcpConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 单个传感器的订阅
#[derive(Debug, Clone)]
struct Subscription {
    sensor: SensorSpec,
    value_field: usize,
}

impl Subscription {
    /// 从匹配的语句提取读数：状态位无效或数值解析失败时为 `Invalid`。
    fn extract(&self, sentence: &Sentence) -> Reading {
        if sentence.data_valid() == Some(false) {
            debug!(
                target: "gw.nmea",
                sensor_id = %self.sensor.id,
                sentence = %sentence.key,
                "nmea data flagged invalid"
            );
            return self.sensor.invalid_reading();
        }

        let raw = sentence.field(self.value_field).map(str::trim);
        match raw.and_then(|field| field.parse::<f64>().ok()) {
            Some(value) if value.is_finite() => self.sensor.valid_reading(value),
            _ => {
                warn!(
                    target: "gw.nmea",
                    sensor_id = %self.sensor.id,
                    field = self.value_field,
                    raw = ?raw,
                    "nmea value not numeric"
                );
                self.sensor.invalid_reading()
            }
        }
    }
}

/// 按语句键索引的订阅表；同一键仅第一个传感器生效。
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_key: HashMap<SentenceKey, Subscription>,
}

impl SubscriptionIndex {
    pub fn from_sensors(sensors: &[SensorSpec]) -> Self {
        let mut by_key: HashMap<SentenceKey, Subscription> = HashMap::new();
        for sensor in sensors {
            let CollectorParams::Nmea(params) = &sensor.collector else {
                continue;
            };
            let key = SentenceKey::new(
                params.expected_talker_id.clone(),
                params.expected_sentence_type.clone(),
            );
            if let Some(existing) = by_key.get(&key) {
                warn!(
                    target: "gw.nmea",
                    sensor_id = %sensor.id,
                    shadowed_by = %existing.sensor.id,
                    sentence = %key,
                    "nmea sensor shares a sentence key and will not receive readings"
                );
                continue;
            }
            by_key.insert(
                key,
                Subscription {
                    sensor: sensor.clone(),
                    value_field: params.value_field,
                },
            );
        }
        Self { by_key }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn find(&self, sentence: &Sentence) -> Option<&Subscription> {
        self.by_key.get(&sentence.key)
    }
}

/// 处理一行原始文本：解析失败或无订阅时不产出读数。
pub fn handle_line(raw: &str, index: &SubscriptionIndex) -> Option<Reading> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    let sentence = match parse_sentence(line) {
        Ok(sentence) => sentence,
        Err(err) => {
            record_stream_parse_error();
            warn!(target: "gw.nmea", error = %err, raw = %line, "nmea parse failed");
            return None;
        }
    };
    let subscription = index.find(&sentence)?;
    Some(subscription.extract(&sentence))
}

/// 读循环结束原因
enum StreamEnd {
    PeerClosed,
    Stopped,
}

/// NMEA TCP 流式采集器
pub struct NmeaCollector {
    config: NmeaTcpConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NmeaCollector {
    pub fn new(config: NmeaTcpConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl Collector for NmeaCollector {
    fn family(&self) -> CollectorFamily {
        CollectorFamily::Nmea
    }

    async fn start(
        &mut self,
        sensors: &[SensorSpec],
        sink: ReadingSink,
    ) -> Result<(), ProtocolError> {
        if !self.config.enabled {
            info!(target: "gw.nmea", "nmea collector disabled by configuration");
            return Ok(());
        }
        if self.is_running() {
            warn!(target: "gw.nmea", "nmea collector already running");
            return Ok(());
        }

        let index = SubscriptionIndex::from_sensors(sensors);
        if index.is_empty() {
            info!(target: "gw.nmea", "no nmea sensors configured for this collector");
            return Ok(());
        }

        self.cancel = CancellationToken::new();
        info!(
            target: "gw.nmea",
            endpoint = %self.config.endpoint(),
            subscriptions = index.len(),
            "nmea collector started"
        );
        self.task = Some(tokio::spawn(connection_loop(
            self.config.clone(),
            Arc::new(index),
            sink,
            self.cancel.clone(),
        )));
        Ok(())
    }

    async fn stop(&mut self) {
        // 取消后读循环返回，TcpStream 随之释放并关闭
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => error!(target: "gw.nmea", error = %err, "nmea connection task failed"),
            }
        }
        info!(target: "gw.nmea", "nmea collector stopped");
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// 连接循环：连接 → 读行直到对端关闭或出错 → 固定间隔后重连。
/// 单行最大字节数；超出视为流错误，断开后重连
const MAX_LINE_LENGTH: u64 = 64 * 1024;

async fn connection_loop(
    config: NmeaTcpConfig,
    index: Arc<SubscriptionIndex>,
    sink: ReadingSink,
    cancel: CancellationToken,
) {
    let endpoint = config.endpoint();
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let retry_delay = Duration::from_millis(config.retry_delay_ms);

    loop {
        info!(target: "gw.nmea", endpoint = %endpoint, "nmea connecting");
        let connect = tokio::select! {
            _ = cancel.cancelled() => break,
            connect = tokio::time::timeout(connect_timeout, TcpStream::connect(&endpoint)) => connect,
        };

        match connect {
            Ok(Ok(stream)) => {
                record_collector_connect();
                info!(target: "gw.nmea", endpoint = %endpoint, "nmea connected");
                match read_lines(stream, &index, &sink, &cancel).await {
                    Ok(StreamEnd::Stopped) => break,
                    Ok(StreamEnd::PeerClosed) => {
                        warn!(target: "gw.nmea", endpoint = %endpoint, "nmea server closed connection")
                    }
                    Err(err) => {
                        error!(target: "gw.nmea", endpoint = %endpoint, error = %err, "nmea read failed")
                    }
                }
            }
            Ok(Err(err)) => {
                record_collector_connect_failure();
                error!(target: "gw.nmea", endpoint = %endpoint, error = %err, "nmea connect failed");
            }
            Err(_) => {
                record_collector_connect_failure();
                error!(target: "gw.nmea", endpoint = %endpoint, "nmea connect timed out");
            }
        }

        debug!(
            target: "gw.nmea",
            retry_in_ms = retry_delay.as_millis() as u64,
            "nmea reconnect scheduled"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
    info!(target: "gw.nmea", "nmea connection loop stopped");
}

async fn read_lines(
    stream: TcpStream,
    index: &SubscriptionIndex,
    sink: &ReadingSink,
    cancel: &CancellationToken,
) -> Result<StreamEnd, ProtocolError> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_LENGTH);
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Stopped),
            read = limited.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            return Ok(StreamEnd::PeerClosed);
        }
        if buf.last() != Some(&b'\n') && buf.len() as u64 >= MAX_LINE_LENGTH {
            record_stream_parse_error();
            return Err(ProtocolError::DataParse(format!(
                "line exceeds {} bytes",
                MAX_LINE_LENGTH
            )));
        }
        record_stream_line();

        let line = String::from_utf8_lossy(&buf);
        if let Some(reading) = handle_line(&line, index) {
            if sink.push(reading).is_err() {
                debug!(target: "gw.nmea", "acquisition queue closed");
                return Ok(StreamEnd::Stopped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{NmeaSensorParams, PublishParams, ReadingStatus};
    use gw_pipeline::{ReadingSource, acquisition_queue};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn nmea_sensor(id: &str, talker: &str, sentence_type: &str) -> SensorSpec {
        SensorSpec {
            id: id.to_string(),
            name: id.to_string(),
            collector: CollectorParams::Nmea(NmeaSensorParams {
                expected_talker_id: talker.to_string(),
                expected_sentence_type: sentence_type.to_string(),
                value_field: 0,
            }),
            publish: PublishParams {
                topic_suffix: Some(id.to_string()),
                unit: "deg/min".to_string(),
                change_threshold: 0.5,
                min_publish_interval: None,
            },
        }
    }

    fn index() -> SubscriptionIndex {
        SubscriptionIndex::from_sensors(&[
            nmea_sensor("rot", "HE", "ROT"),
            nmea_sensor("rot-shadow", "HE", "ROT"),
            nmea_sensor("heading", "HE", "HDT"),
        ])
    }

    async fn next_reading(source: &mut ReadingSource) -> Reading {
        tokio::time::timeout(Duration::from_secs(2), source.pop())
            .await
            .expect("reading within timeout")
            .expect("queue open")
    }

    #[test]
    fn first_sensor_wins_shared_key() {
        let index = index();
        assert_eq!(index.len(), 2);
        let reading = handle_line("$HEROT,-2.5,A", &index).unwrap();
        assert_eq!(reading.sensor_id, "rot");
        assert_eq!(reading.value, Some(-2.5));
        assert_eq!(reading.status, ReadingStatus::Valid);
    }

    #[test]
    fn invalid_flag_or_bad_number_yields_invalid_reading() {
        let index = index();
        let flagged = handle_line("$HEROT,-2.5,V", &index).unwrap();
        assert_eq!(flagged.status, ReadingStatus::Invalid);
        assert_eq!(flagged.value, None);

        let garbled = handle_line("$HEROT,abc,A", &index).unwrap();
        assert_eq!(garbled.status, ReadingStatus::Invalid);

        let empty = handle_line("$HEHDT,,T", &index).unwrap();
        assert_eq!(empty.sensor_id, "heading");
        assert_eq!(empty.status, ReadingStatus::Invalid);
    }

    #[test]
    fn unparsable_or_unsubscribed_lines_are_skipped() {
        let index = index();
        assert!(handle_line("garbage line", &index).is_none());
        assert!(handle_line("$HEROT,1.0,A*00", &index).is_none());
        assert!(handle_line("$GPGGA,1,2,3", &index).is_none());
        assert!(handle_line("\r\n", &index).is_none());
    }

    #[tokio::test]
    async fn stream_survives_parse_errors_and_reconnects_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            // 第一次连接：坏行 + 正常行，随后关闭
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"not nmea at all\r\n$HEROT,1.5,A\r\n")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
            drop(socket);

            // 第二次连接：继续推送，保持连接直到测试结束
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"$HEHDT,90.0,T\r\n").await.unwrap();
            socket
        });

        let mut collector = NmeaCollector::new(NmeaTcpConfig {
            host: "127.0.0.1".to_string(),
            port,
            retry_delay_ms: 10,
            ..NmeaTcpConfig::default()
        });
        let (sink, mut source) = acquisition_queue();
        collector
            .start(
                &[
                    nmea_sensor("rot", "HE", "ROT"),
                    nmea_sensor("heading", "HE", "HDT"),
                ],
                sink,
            )
            .await
            .unwrap();
        assert!(collector.is_running());

        let first = next_reading(&mut source).await;
        assert_eq!(first.sensor_id, "rot");
        assert_eq!(first.value, Some(1.5));

        let second = next_reading(&mut source).await;
        assert_eq!(second.sensor_id, "heading");
        assert_eq!(second.value, Some(90.0));

        let _socket = server.await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), collector.stop())
            .await
            .expect("stop completes");
        assert!(!collector.is_running());
    }

    fn local_config(port: u16) -> NmeaTcpConfig {
        NmeaTcpConfig {
            host: "127.0.0.1".to_string(),
            port,
            retry_delay_ms: 10,
            ..NmeaTcpConfig::default()
        }
    }

    #[tokio::test]
    async fn oversized_line_drops_connection_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            // 第一次连接：超长无换行数据，之后的正常行不应被读到
            let (mut socket, _) = listener.accept().await.unwrap();
            let oversized = vec![b'X'; MAX_LINE_LENGTH as usize + 10];
            let _ = socket.write_all(&oversized).await;
            let _ = socket.write_all(b"\r\n$HEROT,9.9,A\r\n").await;

            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"$HEROT,1.5,A\r\n").await.unwrap();
            socket
        });

        let mut collector = NmeaCollector::new(local_config(port));
        let (sink, mut source) = acquisition_queue();
        collector
            .start(&[nmea_sensor("rot", "HE", "ROT")], sink)
            .await
            .unwrap();

        let reading = next_reading(&mut source).await;
        assert_eq!(reading.sensor_id, "rot");
        assert_eq!(reading.value, Some(1.5));

        let _socket = server.await.unwrap();
        collector.stop().await;
    }

    #[tokio::test]
    async fn keeps_retrying_until_listener_appears() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut collector = NmeaCollector::new(NmeaTcpConfig {
            retry_delay_ms: 20,
            ..local_config(port)
        });
        let (sink, mut source) = acquisition_queue();
        collector
            .start(&[nmea_sensor("heading", "HE", "HDT")], sink)
            .await
            .unwrap();
        assert!(collector.is_running());

        // 期间连接被拒绝若干次
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(source.try_pop().is_none());

        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let (mut socket, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("collector reconnects")
            .unwrap();
        socket.write_all(b"$HEHDT,45.0,T\r\n").await.unwrap();

        let reading = next_reading(&mut source).await;
        assert_eq!(reading.sensor_id, "heading");
        assert_eq!(reading.value, Some(45.0));
        collector.stop().await;
    }

    #[tokio::test]
    async fn start_without_matching_sensors_spawns_nothing() {
        let mut collector = NmeaCollector::new(NmeaTcpConfig::default());
        let (sink, _source) = acquisition_queue();
        collector.start(&[], sink).await.unwrap();
        assert!(!collector.is_running());
        collector.stop().await;
    }
}
