// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测与跟踪 (Detection & Tracking)
///
/// - Detector: 外部检测器接口 + 边界校验
/// - Tracker:  IOU 贪心多目标跟踪
pub mod detector;
pub mod tracker;
pub mod types;

pub use detector::{DetectionFilter, Detector, ReplayDetector};
pub use tracker::{compute_iou, IouTracker, Track, Tracker};
pub use types::{BBox, Detection, FrameId, Peak, RawDetection, TrackId, TrackStatus, TrackUpdate};
