//! 采集器抽象与连接状态。

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{CollectorFamily, SensorSpec};
use gw_pipeline::ReadingSink;

/// 采集器连接状态（瞬态，不持久化）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// 采集器：持有一条传输连接，为其名下传感器产出读数。
///
/// `start` 接收全部传感器，由采集器自行筛选属于本类型的部分；
/// `stop` 返回前必须等待所有内部任务结束。
#[async_trait]
pub trait Collector: Send {
    fn family(&self) -> CollectorFamily;

    async fn start(
        &mut self,
        sensors: &[SensorSpec],
        sink: ReadingSink,
    ) -> Result<(), ProtocolError>;

    async fn stop(&mut self);

    fn is_running(&self) -> bool;
}
