//! 采集到发布之间的流水线：采集队列与发布判定策略。
//!
//! ```text
//! Collector ─┐
//! Collector ─┼─► ReadingSink ══ unbounded FIFO ══► ReadingSource ─► Publisher
//! Collector ─┘                                       (单消费者)     PublishStates
//! ```

mod policy;
mod queue;

pub use policy::{PublishDecision, PublishState, PublishStates, evaluate};
pub use queue::{ReadingSink, ReadingSource, acquisition_queue};

/// 流水线错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("acquisition queue closed")]
    QueueClosed,
}
