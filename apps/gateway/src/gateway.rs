//! 网关编排器
//!
//! 负责把配置中的传感器分配给对应采集器、启动/停止各组件，并运行队列消费任务：
//!
//! ```text
//! ModbusCollector ─┐
//!                  ├─▶ ReadingSink ══ 采集队列 ══ ReadingSource ─▶ drain 任务 ─▶ Publisher
//! NmeaCollector  ──┘
//! ```
//!
//! 启动顺序：发布器 → 等待连接（最多 1 秒）→ 并发启动采集器 → 消费任务。
//! 停止顺序：并发停止采集器 → 取消消费任务 → 停止发布器。

use domain::{CollectorFamily, SensorSpec};
use futures::future::join_all;
use gw_config::AppConfig;
use gw_pipeline::{ReadingSink, ReadingSource, acquisition_queue};
use gw_protocol::{Collector, ModbusCollector, NmeaCollector, ProtocolError};
use gw_publish::Publisher;
use gw_telemetry::record_reading_dropped;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 启动后等待 Broker 首次连接的上限
const PUBLISHER_CONNECT_WAIT: Duration = Duration::from_secs(1);

/// 编排错误
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway already started")]
    AlreadyStarted,

    #[error("{family} collector failed to start: {source}")]
    CollectorStart {
        family: CollectorFamily,
        #[source]
        source: ProtocolError,
    },
}

/// 消费任务结束后交还的资源
struct Drained {
    publisher: Option<Publisher>,
    source: ReadingSource,
}

struct DrainTask {
    cancel: CancellationToken,
    handle: JoinHandle<Drained>,
}

/// 网关编排器
pub struct Gateway {
    sensors: Vec<SensorSpec>,
    collectors: Vec<Box<dyn Collector>>,
    publisher: Option<Publisher>,
    sink: Option<ReadingSink>,
    source: Option<ReadingSource>,
    drain: Option<DrainTask>,
}

impl Gateway {
    pub fn new(
        sensors: Vec<SensorSpec>,
        collectors: Vec<Box<dyn Collector>>,
        publisher: Option<Publisher>,
    ) -> Self {
        let (sink, source) = acquisition_queue();
        Self {
            sensors,
            collectors,
            publisher,
            sink: Some(sink),
            source: Some(source),
            drain: None,
        }
    }

    /// 按配置装配：每个启用且至少有一个传感器的采集器类型一个实例。
    pub fn from_config(config: &AppConfig) -> Self {
        let has_sensors = |family: CollectorFamily| {
            config.sensors.iter().any(|sensor| sensor.family() == family)
        };

        let mut collectors: Vec<Box<dyn Collector>> = Vec::new();
        let modbus = &config.collectors.modbus_tcp;
        if modbus.enabled && has_sensors(CollectorFamily::ModbusTcp) {
            collectors.push(Box::new(ModbusCollector::new(modbus.clone())));
        }
        let nmea = &config.collectors.nmea;
        if nmea.enabled && has_sensors(CollectorFamily::Nmea) {
            collectors.push(Box::new(NmeaCollector::new(nmea.clone())));
        }

        let publisher = config
            .mqtt_publisher
            .enabled
            .then(|| Publisher::new(config.mqtt_publisher.clone()));

        Self::new(config.sensors.clone(), collectors, publisher)
    }

    pub fn collector_families(&self) -> Vec<CollectorFamily> {
        self.collectors.iter().map(|collector| collector.family()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.drain.is_some()
    }

    pub async fn start(&mut self) -> Result<(), GatewayError> {
        let (Some(sink), Some(source)) = (self.sink.clone(), self.source.take()) else {
            return Err(GatewayError::AlreadyStarted);
        };

        if let Some(publisher) = self.publisher.as_mut() {
            publisher.start();
            if !publisher.wait_connected(PUBLISHER_CONNECT_WAIT).await {
                warn!(target: "gw.gateway", "broker not connected yet, readings are dropped until it is");
            }
        } else {
            info!(target: "gw.gateway", "publisher disabled, readings will be discarded");
        }

        let sensors = &self.sensors;
        let results = join_all(
            self.collectors
                .iter_mut()
                .map(|collector| collector.start(sensors, sink.clone())),
        )
        .await;
        let families = self.collector_families();
        let failure = families
            .into_iter()
            .zip(results)
            .find_map(|(family, result)| result.err().map(|err| (family, err)));
        if let Some((family, err)) = failure {
            error!(target: "gw.gateway", collector = %family, error = %err, "collector start failed");
            join_all(self.collectors.iter_mut().map(|collector| collector.stop())).await;
            if let Some(publisher) = self.publisher.as_mut() {
                publisher.stop().await;
            }
            self.source = Some(source);
            return Err(GatewayError::CollectorStart {
                family,
                source: err,
            });
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drain_loop(source, self.publisher.take(), cancel.clone()));
        self.drain = Some(DrainTask { cancel, handle });

        info!(
            target: "gw.gateway",
            sensors = self.sensors.len(),
            collectors = self.collectors.len(),
            "gateway started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        info!(target: "gw.gateway", "gateway stopping");

        join_all(self.collectors.iter_mut().map(|collector| collector.stop())).await;
        self.sink = None;

        if let Some(drain) = self.drain.take() {
            drain.cancel.cancel();
            match drain.handle.await {
                Ok(Drained {
                    publisher,
                    mut source,
                }) => {
                    self.publisher = publisher;
                    source.close();
                    let mut discarded = 0usize;
                    while source.try_pop().is_some() {
                        record_reading_dropped();
                        discarded += 1;
                    }
                    if discarded > 0 {
                        info!(target: "gw.gateway", discarded, "queued readings discarded at shutdown");
                    }
                }
                Err(err) => error!(target: "gw.gateway", error = %err, "drain task failed"),
            }
        }

        if let Some(publisher) = self.publisher.as_mut() {
            publisher.stop().await;
        }
        info!(target: "gw.gateway", "gateway stopped");
    }
}

/// 消费循环：逐条交给发布器，直到被取消。
async fn drain_loop(
    mut source: ReadingSource,
    mut publisher: Option<Publisher>,
    cancel: CancellationToken,
) -> Drained {
    loop {
        let reading = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            reading = source.pop() => reading,
        };
        let Some(reading) = reading else {
            debug!(target: "gw.gateway", "acquisition queue closed");
            break;
        };
        match publisher.as_mut() {
            Some(publisher) => {
                publisher.publish(&reading).await;
            }
            None => record_reading_dropped(),
        }
    }
    Drained { publisher, source }
}
