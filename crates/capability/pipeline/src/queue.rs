use crate::PipelineError;
use domain::Reading;
use gw_telemetry::{record_reading_collected, record_reading_invalid};
use tokio::sync::mpsc;

/// 创建采集队列（无界 FIFO）。
///
/// 生产端可克隆，每个采集任务持有一份；消费端唯一。
pub fn acquisition_queue() -> (ReadingSink, ReadingSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ReadingSink { tx }, ReadingSource { rx })
}

/// 采集队列生产端。
#[derive(Debug, Clone)]
pub struct ReadingSink {
    tx: mpsc::UnboundedSender<Reading>,
}

impl ReadingSink {
    /// 入队；无界队列永不阻塞采集任务，仅在消费端已关闭时失败。
    pub fn push(&self, reading: Reading) -> Result<(), PipelineError> {
        record_reading_collected();
        if !reading.is_valid() {
            record_reading_invalid();
        }
        self.tx
            .send(reading)
            .map_err(|_| PipelineError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 采集队列消费端。
#[derive(Debug)]
pub struct ReadingSource {
    rx: mpsc::UnboundedReceiver<Reading>,
}

impl ReadingSource {
    /// 等待下一条读数；所有生产端都释放后返回 `None`。
    pub async fn pop(&mut self) -> Option<Reading> {
        self.rx.recv().await
    }

    pub fn try_pop(&mut self) -> Option<Reading> {
        self.rx.try_recv().ok()
    }

    /// 关闭消费端，之后的入队全部失败。
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ReadingStatus;

    fn reading(sensor_id: &str, value: f64) -> Reading {
        Reading {
            sensor_id: sensor_id.to_string(),
            value: Some(value),
            unit: "C".to_string(),
            status: ReadingStatus::Valid,
            timestamp: chrono::Utc::now(),
            topic_suffix: None,
            change_threshold: 0.0,
            min_publish_interval: None,
        }
    }

    #[tokio::test]
    async fn preserves_arrival_order_across_producers() {
        let (sink, mut source) = acquisition_queue();
        let other = sink.clone();

        sink.push(reading("a", 1.0)).unwrap();
        other.push(reading("b", 2.0)).unwrap();
        sink.push(reading("a", 3.0)).unwrap();

        let order: Vec<(String, Option<f64>)> = [
            source.pop().await.unwrap(),
            source.pop().await.unwrap(),
            source.pop().await.unwrap(),
        ]
        .into_iter()
        .map(|r| (r.sensor_id, r.value))
        .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), Some(1.0)),
                ("b".to_string(), Some(2.0)),
                ("a".to_string(), Some(3.0)),
            ]
        );
        assert!(source.try_pop().is_none());
    }

    #[tokio::test]
    async fn pop_returns_none_once_all_producers_dropped() {
        let (sink, mut source) = acquisition_queue();
        sink.push(reading("a", 1.0)).unwrap();
        drop(sink);

        assert!(source.pop().await.is_some());
        assert!(source.pop().await.is_none());
    }

    #[test]
    fn push_fails_after_consumer_closed() {
        let (sink, mut source) = acquisition_queue();
        source.close();
        assert!(sink.is_closed());
        assert!(matches!(
            sink.push(reading("a", 1.0)),
            Err(PipelineError::QueueClosed)
        ));
    }
}
