// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 错误类型 (Error taxonomy)
//!
//! 跟踪器与事件管理器从不失败; 只有边界校验、检测器与告警投递会产生错误,
//! 且没有一种错误会终止进程。

use crate::events::EventId;

/// 非法检测框 (边界校验失败, 该检测在本帧被丢弃)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidDetection {
    #[error("non-finite coordinate in box {0:?}")]
    NonFiniteCoordinate([f32; 4]),

    #[error("negative coordinate in box {0:?}")]
    NegativeCoordinate([f32; 4]),

    #[error("degenerate box {0:?} (x2 <= x1 or y2 <= y1)")]
    EmptyBox([f32; 4]),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f32),

    #[error("empty class label")]
    EmptyLabel,
}

/// 检测器推理失败 (该帧按零检测处理)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("inference failed on frame {frame_id}: {reason}")]
pub struct InferenceError {
    pub frame_id: u64,
    pub reason: String,
}

/// 告警投递错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    /// 网络错误 / 5xx / 429, 可重试
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// 4xx (凭证无效等), 立即失败不重试
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("duplicate alert for event {0} suppressed")]
    Duplicate(EventId),

    #[error("delivery abandoned during shutdown")]
    Abandoned,
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// 告警队列溢出 (告警被丢弃, 始终记录日志)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueOverflow {
    #[error("alert queue full (capacity {capacity}), alert for event {event_id} dropped")]
    Full { event_id: EventId, capacity: usize },

    #[error("alert queue closed, alert for event {0} dropped")]
    Closed(EventId),
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// 库级错误汇总
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidDetection(#[from] InvalidDetection),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    QueueOverflow(#[from] QueueOverflow),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
