//! # 协议采集能力模块
//!
//! 提供多协议数据采集能力，支持：
//! - **Modbus TCP**：按传感器独立轮询保持寄存器，共享一条连接
//! - **NMEA TCP**：连接 NMEA 文本流，按 talker + 语句类型分发
//!
//! ## 架构设计
//!
//! ```text
//! SensorSpec 列表 (collector_type + collector_config)
//!       │
//!       ▼
//! Collector (trait)
//!       │
//!       ├── ModbusCollector ── SharedConnection ── RegisterTransport
//!       └── NmeaCollector   ── SubscriptionIndex ── parse_sentence
//!       │
//!       ▼
//! ReadingSink (采集队列) → Publisher
//! ```
//!
//! ## 配置格式
//!
//! ### Modbus TCP
//! ```toml
//! [collectors.modbus_tcp]
//! host = "127.0.0.1"
//! port = 8889
//!
//! # sensor.collector_config
//! register_address = 100
//! data_type = "int16"
//! ```
//!
//! ### NMEA
//! ```toml
//! [collectors.nmea]
//! host = "127.0.0.1"
//! port = 8888
//!
//! # sensor.collector_config
//! expected_talker_id = "HE"
//! expected_sentence_type = "ROT"
//! ```

mod collector;
mod connection;
mod error;
mod modbus_tcp;
mod nmea;
mod nmea_stream;
mod types;

pub use collector::{Collector, ConnectionState};
pub use connection::{RegisterTransport, SharedConnection};
pub use error::ProtocolError;
pub use modbus_tcp::{ModbusCollector, ModbusTcpConfig, TcpRegisterTransport};
pub use nmea::{Sentence, SentenceError, SentenceKey, parse_sentence};
pub use nmea_stream::{NmeaCollector, NmeaTcpConfig, SubscriptionIndex, handle_line};
pub use types::*;
