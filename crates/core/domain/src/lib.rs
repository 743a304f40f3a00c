//! 网关核心领域模型：读数与传感器配置。

pub mod data;
pub mod sensor;

pub use data::{Reading, ReadingStatus};
pub use sensor::{
    CollectorFamily, CollectorParams, ModbusSensorParams, NmeaSensorParams, PublishParams,
    RegisterDataType, SensorSpec,
};
