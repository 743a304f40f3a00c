//! Modbus TCP 轮询采集器
//!
//! 每个传感器一个独立轮询任务，所有任务共享同一条 Modbus 连接。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let mut collector = ModbusCollector::new(ModbusTcpConfig::default());
//! collector.start(&sensors, sink).await?;
//! // ...
//! collector.stop().await;
//! ```

use crate::collector::{Collector, ConnectionState};
use crate::connection::{RegisterTransport, SharedConnection};
use crate::error::ProtocolError;
use crate::types::{RegisterRead, apply_scaling, decode_registers};
use async_trait::async_trait;
use domain::{CollectorFamily, CollectorParams, Reading, RegisterDataType, SensorSpec};
use gw_pipeline::ReadingSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_modbus::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Modbus TCP 采集器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Modbus 服务器主机地址
    #[serde(default = "default_host")]
    pub host: String,
    /// Modbus 服务器端口
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 传感器未指定时使用的从站 ID
    #[serde(default = "default_unit_id")]
    pub default_unit_id: u8,
    /// 默认轮询间隔（毫秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 默认读取超时（毫秒）
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
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

fn default_modbus_port() -> u16 {
    8889
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_read_timeout() -> u64 {
    100
}

fn default_retry_delay() -> u64 {
    5000
}

impl Default for ModbusTcpConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_modbus_port(),
            default_unit_id: default_unit_id(),
            poll_interval_ms: default_poll_interval(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ModbusTcpConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 基于 tokio-modbus 的寄存器传输。
pub struct TcpRegisterTransport {
    endpoint: String,
    connect_timeout: Duration,
    ctx: Mutex<Option<tokio_modbus::client::Context>>,
}

impl TcpRegisterTransport {
    pub fn new(config: &ModbusTcpConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            ctx: Mutex::new(None),
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, ProtocolError> {
        let unresolved = |reason: String| {
            ProtocolError::Connection(format!("cannot resolve {}: {}", self.endpoint, reason))
        };
        tokio::net::lookup_host(&self.endpoint)
            .await
            .map_err(|err| unresolved(err.to_string()))?
            .next()
            .ok_or_else(|| unresolved("no address".to_string()))
    }
}

#[async_trait]
impl RegisterTransport for TcpRegisterTransport {
    async fn connect(&self) -> Result<(), ProtocolError> {
        let mut guard = self.ctx.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let addr = self.resolve().await?;
        let ctx = tokio::time::timeout(self.connect_timeout, tcp::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connect to {}", addr)))?
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        *guard = Some(ctx);
        Ok(())
    }

    async fn read_holding_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<RegisterRead, ProtocolError> {
        let mut guard = self.ctx.lock().await;
        let ctx = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        ctx.set_slave(Slave(unit_id));

        let response =
            match tokio::time::timeout(timeout, ctx.read_holding_registers(address, count)).await {
                Ok(response) => response,
                Err(_) => {
                    // 超时后响应可能晚到，丢弃连接避免错位
                    *guard = None;
                    return Err(ProtocolError::Timeout(format!(
                        "read register {} (unit {})",
                        address, unit_id
                    )));
                }
            };

        match response {
            Ok(Ok(registers)) => Ok(RegisterRead::Registers(registers)),
            Ok(Err(exception)) => Ok(RegisterRead::Exception(format!("{:?}", exception))),
            Err(e) => {
                *guard = None;
                Err(ProtocolError::Modbus(e.to_string()))
            }
        }
    }

    async fn close(&self) {
        // 释放 Context 即关闭底层 TCP 连接
        self.ctx.lock().await.take();
    }
}

/// 单个传感器的轮询计划（已回落到采集器默认值）
#[derive(Debug, Clone)]
struct PollPlan {
    sensor: SensorSpec,
    unit_id: u8,
    register_address: u16,
    data_type: RegisterDataType,
    scale: Option<f64>,
    offset: Option<f64>,
    poll_interval: Duration,
    read_timeout: Duration,
}

/// Modbus TCP 轮询采集器
pub struct ModbusCollector {
    config: ModbusTcpConfig,
    connection: Arc<SharedConnection>,
    cancel: CancellationToken,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl ModbusCollector {
    /// 创建使用 TCP 传输的采集器
    pub fn new(config: ModbusTcpConfig) -> Self {
        let transport = Arc::new(TcpRegisterTransport::new(&config));
        Self::with_transport(config, transport)
    }

    /// 使用指定传输创建采集器
    pub fn with_transport(config: ModbusTcpConfig, transport: Arc<dyn RegisterTransport>) -> Self {
        let connection = Arc::new(SharedConnection::new(
            transport,
            config.endpoint(),
            Duration::from_millis(config.retry_delay_ms),
        ));
        Self {
            config,
            connection,
            cancel: CancellationToken::new(),
            tasks: HashMap::new(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn plan_for(&self, sensor: &SensorSpec) -> Option<PollPlan> {
        let CollectorParams::ModbusTcp(params) = &sensor.collector else {
            return None;
        };
        Some(PollPlan {
            sensor: sensor.clone(),
            unit_id: params.unit_id.unwrap_or(self.config.default_unit_id),
            register_address: params.register_address,
            data_type: params.data_type,
            scale: params.scale,
            offset: params.offset,
            poll_interval: params
                .polling_interval
                .unwrap_or(Duration::from_millis(self.config.poll_interval_ms)),
            read_timeout: params
                .read_timeout
                .unwrap_or(Duration::from_millis(self.config.read_timeout_ms)),
        })
    }
}

#[async_trait]
impl Collector for ModbusCollector {
    fn family(&self) -> CollectorFamily {
        CollectorFamily::ModbusTcp
    }

    async fn start(
        &mut self,
        sensors: &[SensorSpec],
        sink: ReadingSink,
    ) -> Result<(), ProtocolError> {
        if !self.config.enabled {
            info!(target: "gw.modbus", "modbus collector disabled by configuration");
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        for sensor in sensors {
            let Some(plan) = self.plan_for(sensor) else {
                continue;
            };
            if self
                .tasks
                .get(&sensor.id)
                .is_some_and(|task| !task.is_finished())
            {
                warn!(target: "gw.modbus", sensor_id = %sensor.id, "modbus polling task already running");
                continue;
            }
            let task = tokio::spawn(poll_sensor(
                plan,
                self.connection.clone(),
                sink.clone(),
                self.cancel.clone(),
            ));
            self.tasks.insert(sensor.id.clone(), task);
        }

        if self.tasks.is_empty() {
            info!(target: "gw.modbus", "no modbus sensors configured for this collector");
        } else {
            info!(
                target: "gw.modbus",
                endpoint = %self.config.endpoint(),
                sensors = self.tasks.len(),
                "modbus collector started"
            );
        }
        Ok(())
    }

    async fn stop(&mut self) {
        info!(target: "gw.modbus", "stopping modbus collector");
        self.cancel.cancel();

        for (sensor_id, task) in self.tasks.drain() {
            match task.await {
                Ok(()) => debug!(target: "gw.modbus", sensor_id = %sensor_id, "modbus polling task stopped"),
                Err(err) if err.is_cancelled() => {
                    debug!(target: "gw.modbus", sensor_id = %sensor_id, "modbus polling task cancelled")
                }
                Err(err) => {
                    error!(target: "gw.modbus", sensor_id = %sensor_id, error = %err, "modbus polling task failed")
                }
            }
        }

        self.connection.close().await;
        info!(target: "gw.modbus", "modbus collector stopped");
    }

    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.values().any(|task| !task.is_finished())
    }
}

/// 单传感器轮询循环：同一传感器的读取严格串行，单次失败不会终止任务。
async fn poll_sensor(
    plan: PollPlan,
    connection: Arc<SharedConnection>,
    sink: ReadingSink,
    cancel: CancellationToken,
) {
    info!(
        target: "gw.modbus",
        sensor_id = %plan.sensor.id,
        register = plan.register_address,
        unit = plan.unit_id,
        interval_ms = plan.poll_interval.as_millis() as u64,
        "modbus polling started"
    );

    while !cancel.is_cancelled() {
        if !connection.is_connected() {
            warn!(target: "gw.modbus", sensor_id = %plan.sensor.id, "modbus disconnected, reconnecting");
            if !connection.ensure_connected(&cancel).await {
                if sleep_or_cancelled(&cancel, plan.poll_interval).await {
                    break;
                }
                continue;
            }
        }

        let reading = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            reading = read_once(&plan, &connection) => reading,
        };
        if sink.push(reading).is_err() {
            debug!(target: "gw.modbus", sensor_id = %plan.sensor.id, "acquisition queue closed");
            break;
        }

        if sleep_or_cancelled(&cancel, plan.poll_interval).await {
            break;
        }
    }
}

/// 读取一次；任何失败都转换为 `Invalid` 读数。
async fn read_once(plan: &PollPlan, connection: &SharedConnection) -> Reading {
    let count = plan.data_type.register_count();
    let response = connection
        .transport()
        .read_holding_registers(plan.unit_id, plan.register_address, count, plan.read_timeout)
        .await;

    match response {
        Ok(RegisterRead::Registers(registers)) => {
            match decode_registers(&registers, plan.data_type) {
                Ok(raw) => {
                    let value = apply_scaling(raw, plan.scale, plan.offset);
                    debug!(
                        target: "gw.modbus",
                        sensor_id = %plan.sensor.id,
                        value,
                        unit = %plan.sensor.publish.unit,
                        "modbus reading"
                    );
                    plan.sensor.valid_reading(value)
                }
                Err(err) => {
                    warn!(target: "gw.modbus", sensor_id = %plan.sensor.id, error = %err, "modbus decode failed");
                    plan.sensor.invalid_reading()
                }
            }
        }
        Ok(RegisterRead::Exception(code)) => {
            error!(
                target: "gw.modbus",
                sensor_id = %plan.sensor.id,
                register = plan.register_address,
                exception = %code,
                "modbus exception response"
            );
            plan.sensor.invalid_reading()
        }
        Err(err) => {
            error!(
                target: "gw.modbus",
                sensor_id = %plan.sensor.id,
                register = plan.register_address,
                error = %err,
                "modbus read failed"
            );
            connection.mark_disconnected();
            plan.sensor.invalid_reading()
        }
    }
}

/// 休眠指定时长；停止时提前返回 `true`。
async fn sleep_or_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
