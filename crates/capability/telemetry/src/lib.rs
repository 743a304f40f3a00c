//! 日志初始化与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub readings_collected: u64,
    pub readings_invalid: u64,
    pub readings_published: u64,
    pub readings_suppressed: u64,
    pub readings_dropped: u64,
    pub publish_failures: u64,
    pub collector_connects: u64,
    pub collector_connect_failures: u64,
    pub stream_lines: u64,
    pub stream_parse_errors: u64,
}

/// 网关计数指标。
pub struct TelemetryMetrics {
    readings_collected: AtomicU64,
    readings_invalid: AtomicU64,
    readings_published: AtomicU64,
    readings_suppressed: AtomicU64,
    readings_dropped: AtomicU64,
    publish_failures: AtomicU64,
    collector_connects: AtomicU64,
    collector_connect_failures: AtomicU64,
    stream_lines: AtomicU64,
    stream_parse_errors: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            readings_collected: AtomicU64::new(0),
            readings_invalid: AtomicU64::new(0),
            readings_published: AtomicU64::new(0),
            readings_suppressed: AtomicU64::new(0),
            readings_dropped: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            collector_connects: AtomicU64::new(0),
            collector_connect_failures: AtomicU64::new(0),
            stream_lines: AtomicU64::new(0),
            stream_parse_errors: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            readings_collected: self.readings_collected.load(Ordering::Relaxed),
            readings_invalid: self.readings_invalid.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
            readings_suppressed: self.readings_suppressed.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            collector_connects: self.collector_connects.load(Ordering::Relaxed),
            collector_connect_failures: self.collector_connect_failures.load(Ordering::Relaxed),
            stream_lines: self.stream_lines.load(Ordering::Relaxed),
            stream_parse_errors: self.stream_parse_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing：`RUST_LOG` 优先，否则使用传入的默认级别。
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录采集读数次数（含无效读数）。
pub fn record_reading_collected() {
    metrics().readings_collected.fetch_add(1, Ordering::Relaxed);
}

/// 记录无效读数次数。
pub fn record_reading_invalid() {
    metrics().readings_invalid.fetch_add(1, Ordering::Relaxed);
}

/// 记录发布成功次数。
pub fn record_reading_published() {
    metrics().readings_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录被发布策略抑制的次数。
pub fn record_reading_suppressed() {
    metrics().readings_suppressed.fetch_add(1, Ordering::Relaxed);
}

/// 记录丢弃次数（无主题 / 未连接 / 已停止）。
pub fn record_reading_dropped() {
    metrics().readings_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录发布失败次数。
pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录采集器连接成功次数。
pub fn record_collector_connect() {
    metrics().collector_connects.fetch_add(1, Ordering::Relaxed);
}

/// 记录采集器连接失败次数。
pub fn record_collector_connect_failure() {
    metrics()
        .collector_connect_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录流式连接收到的行数。
pub fn record_stream_line() {
    metrics().stream_lines.fetch_add(1, Ordering::Relaxed);
}

/// 记录语句解析失败次数。
pub fn record_stream_parse_error() {
    metrics().stream_parse_errors.fetch_add(1, Ordering::Relaxed);
}
