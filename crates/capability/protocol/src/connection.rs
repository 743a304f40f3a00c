//! 同一采集器内多个轮询任务共享的连接。
//!
//! 连接状态只用原子标志保护，不加锁：两个任务可能同时发现断线并各自发起重连，
//! 传输层的 `connect` 在已连接时为空操作，因此重复重连无副作用。

use crate::collector::ConnectionState;
use crate::error::ProtocolError;
use crate::types::RegisterRead;
use async_trait::async_trait;
use gw_telemetry::{record_collector_connect, record_collector_connect_failure};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 寄存器读取传输（协议边界）。
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    /// 建立连接；已连接时直接返回 `Ok`。
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// 读取保持寄存器。传输层错误（含超时）后实现应丢弃底层连接。
    async fn read_holding_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<RegisterRead, ProtocolError>;

    async fn close(&self);
}

/// 共享连接：传输对象 + 连接状态标志。
pub struct SharedConnection {
    transport: Arc<dyn RegisterTransport>,
    state: AtomicU8,
    connect_failures: AtomicU64,
    retry_delay: Duration,
    endpoint: String,
}

impl SharedConnection {
    pub fn new(
        transport: Arc<dyn RegisterTransport>,
        endpoint: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            connect_failures: AtomicU64::new(0),
            retry_delay,
            endpoint: endpoint.into(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn transport(&self) -> &Arc<dyn RegisterTransport> {
        &self.transport
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// 确保已连接：无限次重试、固定间隔，仅在停止时放弃。
    ///
    /// 多个任务可能同时重连；每轮失败只由把状态从 `Connecting` 切回的任务计数并记录错误日志。
    /// 返回 `false` 表示采集器正在停止。
    pub async fn ensure_connected(&self, cancel: &CancellationToken) -> bool {
        loop {
            if self.is_connected() {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }

            if self.transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
                info!(target: "gw.modbus", endpoint = %self.endpoint, "modbus_connecting");
            } else {
                debug!(target: "gw.modbus", endpoint = %self.endpoint, "modbus_connect_joined");
            }
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                    return false;
                }
                attempt = self.transport.connect() => attempt,
            };

            match attempt {
                Ok(()) => {
                    let previous = self
                        .state
                        .swap(ConnectionState::Connected as u8, Ordering::AcqRel);
                    if ConnectionState::from_u8(previous) != ConnectionState::Connected {
                        record_collector_connect();
                        info!(target: "gw.modbus", endpoint = %self.endpoint, "modbus_connected");
                    }
                    return true;
                }
                Err(err) => {
                    if self.transition(ConnectionState::Connecting, ConnectionState::Disconnected) {
                        self.connect_failures.fetch_add(1, Ordering::Relaxed);
                        record_collector_connect_failure();
                        error!(
                            target: "gw.modbus",
                            endpoint = %self.endpoint,
                            error = %err,
                            retry_in_ms = self.retry_delay.as_millis() as u64,
                            "modbus_connect_failed"
                        );
                    } else {
                        debug!(target: "gw.modbus", endpoint = %self.endpoint, error = %err, "modbus_connect_failed");
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }

    /// 已记录的连接失败轮数（同一轮内多个任务的失败只计一次）。
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 标记断线，下一个发现断线的任务负责重连。
    pub fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    pub async fn close(&self) {
        self.set_state(ConnectionState::Disconnected);
        self.transport.close().await;
    }
}
