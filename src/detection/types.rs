// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 火情检测数据结构定义
/// Data structures for fire detection and tracking
use serde::{Deserialize, Serialize};

use crate::error::InvalidDetection;

// ========== 公共类型 ==========

/// 帧序号 (单调递增)
pub type FrameId = u64;

/// 跟踪ID (进程生命周期内不复用)
pub type TrackId = u64;

/// 默认类别标签
pub const FIRE_LABEL: &str = "fire";

// ========== 数据结构 ==========

/// 检测框 (Axis-aligned bounding box, 帧坐标系)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// 获取中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// 检测器原始输出 (未校验, 来自外部检测器或回放文件)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// [x1, y1, x2, y2]
    pub bbox: [f32; 4],
    pub confidence: f32,
    #[serde(default = "default_label")]
    pub class_label: String,
}

fn default_label() -> String {
    FIRE_LABEL.to_string()
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            class_label: default_label(),
        }
    }
}

/// 已校验的检测 (Detection)
///
/// 只能通过 `TryFrom<RawDetection>` 构造, 因此坐标有限且非负、框非退化、
/// 置信度位于 [0, 1]。
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub label: String,
}

impl TryFrom<RawDetection> for Detection {
    type Error = InvalidDetection;

    fn try_from(raw: RawDetection) -> Result<Self, Self::Error> {
        let [x1, y1, x2, y2] = raw.bbox;
        if raw.bbox.iter().any(|v| !v.is_finite()) {
            return Err(InvalidDetection::NonFiniteCoordinate(raw.bbox));
        }
        if raw.bbox.iter().any(|v| *v < 0.0) {
            return Err(InvalidDetection::NegativeCoordinate(raw.bbox));
        }
        if x2 <= x1 || y2 <= y1 {
            return Err(InvalidDetection::EmptyBox(raw.bbox));
        }
        // NaN 不满足 contains, 一并拒绝
        if !(0.0..=1.0).contains(&raw.confidence) {
            return Err(InvalidDetection::ConfidenceOutOfRange(raw.confidence));
        }
        if raw.class_label.trim().is_empty() {
            return Err(InvalidDetection::EmptyLabel);
        }

        Ok(Self {
            bbox: BBox::new(x1, y1, x2, y2),
            confidence: raw.confidence,
            label: raw.class_label,
        })
    }
}

// ========== 跟踪状态 ==========

/// 跟踪生命周期
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    Tentative,
    Confirmed,
    Lost,
}

/// 轨迹历史最高置信度 (含 Tentative 阶段)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub confidence: f32,
    pub frame_id: FrameId,
    pub bbox: BBox,
}

/// 跟踪投影 (Tracker → Event Manager)
///
/// 每帧只为被触及的轨迹 (匹配 / 新建 / 刚丢失) 输出一条。
#[derive(Clone, Debug, PartialEq)]
pub struct TrackUpdate {
    pub track_id: TrackId,
    pub frame_id: FrameId,
    pub bbox: BBox,
    /// 最近一次匹配检测的置信度
    pub confidence: f32,
    /// 自创建以来经历的帧数
    pub age: u32,
    pub hit_streak: u32,
    pub miss_streak: u32,
    pub status: TrackStatus,
    pub peak: Peak,
}
