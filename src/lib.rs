// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 火情哨兵 (Fire Sentinel)
//!
//! 检测框 → 稳定轨迹 → 去抖火情事件 → 限流告警
pub mod clock; // 时钟抽象
pub mod config; // JSON 配置
pub mod detection; // 检测校验与IOU跟踪
pub mod error; // 错误类型
pub mod events; // 火情事件生命周期
pub mod notify; // 告警投递
pub mod pipeline; // 帧同步流水线

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::SentinelConfig;
pub use crate::detection::{BBox, Detection, IouTracker, RawDetection, TrackStatus, TrackUpdate, Tracker};
pub use crate::error::{Error, Result};
pub use crate::events::{EventState, EventTransition, FireEvent, FireEventManager, TransitionKind};
pub use crate::notify::{AlertMessage, AlertSink, AlertTransport, Dispatcher, Notifier};
pub use crate::pipeline::{FirePipeline, Frame, FrameSource, PipelineStats, ReplaySource, ShutdownSignal};

