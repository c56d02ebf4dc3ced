// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 多目标跟踪 (IOU 贪心匹配)
//! Multi-object tracking with greedy IoU association
//!
//! 每帧流程:
//! 1. 计算所有 (轨迹, 检测) 对的 IOU
//! 2. IOU ≥ 阈值的候选按 IOU 降序贪心分配, 同 IOU 时轨迹ID小者优先
//! 3. 未匹配的轨迹累计丢失, 超过容忍度后标记 Lost 并删除
//! 4. 未匹配的检测 → 新建轨迹 (ID 永不复用)

use std::collections::BTreeMap;

use super::types::{BBox, Detection, FrameId, Peak, TrackId, TrackStatus, TrackUpdate};
use crate::config::TrackerConfig;

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
pub trait Tracker {
    /// 更新跟踪器
    ///
    /// # 返回
    /// 本帧被触及的轨迹 (匹配 / 新建 / 刚丢失), 按轨迹ID升序
    fn update(
        &mut self,
        frame_id: FrameId,
        timestamp: f64,
        detections: &[Detection],
    ) -> Vec<TrackUpdate>;

    /// 重置跟踪器 (清除所有跟踪, ID 计数器保持递增)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize;
}

// ========== 跟踪对象 ==========

/// 单条轨迹
#[derive(Clone, Debug)]
pub struct Track {
    /// 唯一跟踪ID
    pub id: TrackId,

    /// 最近一次匹配的边界框
    pub bbox: BBox,

    /// 最近一次匹配的检测置信度
    pub confidence: f32,

    /// 连续命中帧数
    pub hit_streak: u32,

    /// 连续丢失帧数
    pub miss_streak: u32,

    /// 最近一次匹配的帧
    pub last_seen_frame: FrameId,

    /// 最近一次匹配的时间戳
    pub last_seen_at: f64,

    /// 总共经历的帧数 (age)
    pub age: u32,

    pub status: TrackStatus,

    /// 历史最高置信度检测
    pub peak: Peak,
}

impl Track {
    fn new(id: TrackId, frame_id: FrameId, timestamp: f64, det: &Detection, confirm_hits: u32) -> Self {
        let status = if confirm_hits <= 1 {
            TrackStatus::Confirmed
        } else {
            TrackStatus::Tentative
        };
        Self {
            id,
            bbox: det.bbox,
            confidence: det.confidence,
            hit_streak: 1,
            miss_streak: 0,
            last_seen_frame: frame_id,
            last_seen_at: timestamp,
            age: 1,
            status,
            peak: Peak {
                confidence: det.confidence,
                frame_id,
                bbox: det.bbox,
            },
        }
    }

    fn hit(&mut self, frame_id: FrameId, timestamp: f64, det: &Detection, confirm_hits: u32) {
        self.bbox = det.bbox;
        self.confidence = det.confidence;
        self.hit_streak += 1;
        self.miss_streak = 0;
        self.last_seen_frame = frame_id;
        self.last_seen_at = timestamp;
        self.age += 1;
        if det.confidence > self.peak.confidence {
            self.peak = Peak {
                confidence: det.confidence,
                frame_id,
                bbox: det.bbox,
            };
        }

        if self.status == TrackStatus::Tentative && self.hit_streak >= confirm_hits {
            self.status = TrackStatus::Confirmed;
        }
    }

    fn miss(&mut self) {
        self.miss_streak += 1;
        self.hit_streak = 0;
        self.age += 1;
    }

    fn to_update(&self, frame_id: FrameId) -> TrackUpdate {
        TrackUpdate {
            track_id: self.id,
            frame_id,
            bbox: self.bbox,
            confidence: self.confidence,
            age: self.age,
            hit_streak: self.hit_streak,
            miss_streak: self.miss_streak,
            status: self.status,
            peak: self.peak,
        }
    }
}

// ========== IOU 跟踪器 ==========

/// IOU 贪心匹配跟踪器
pub struct IouTracker {
    /// 活跃轨迹 (BTreeMap 保证迭代顺序确定)
    tracks: BTreeMap<TrackId, Track>,

    /// 下一个分配的ID
    next_id: TrackId,

    /// 匹配 IOU 阈值
    iou_threshold: f32,

    /// 转为 Confirmed 所需的连续命中数
    confirm_hits: u32,

    /// 最大允许连续丢失帧数
    max_misses: u32,
}

impl IouTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            iou_threshold: config.iou_match_threshold,
            confirm_hits: config.confirm_hits,
            max_misses: config.max_misses,
        }
    }

    /// 当前活跃轨迹
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// 贪心 IOU 匹配, 返回 (track_id, det_idx)
    fn associate(&self, detections: &[Detection]) -> Vec<(TrackId, usize)> {
        if detections.is_empty() || self.tracks.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (track_id, track) in &self.tracks {
            for (det_idx, det) in detections.iter().enumerate() {
                let iou = compute_iou(&track.bbox, &det.bbox);
                if iou >= self.iou_threshold {
                    candidates.push((iou, *track_id, det_idx));
                }
            }
        }

        // IOU 降序, 同 IOU 时轨迹ID小者优先, 再按检测下标
        candidates.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut assignments = Vec::new();
        let mut used_det = vec![false; detections.len()];
        let mut used_track = std::collections::HashSet::new();

        for (_, track_id, det_idx) in candidates {
            if !used_det[det_idx] && !used_track.contains(&track_id) {
                assignments.push((track_id, det_idx));
                used_det[det_idx] = true;
                used_track.insert(track_id);
            }
        }

        assignments
    }
}

impl Tracker for IouTracker {
    fn update(
        &mut self,
        frame_id: FrameId,
        timestamp: f64,
        detections: &[Detection],
    ) -> Vec<TrackUpdate> {
        let assignments = self.associate(detections);

        let mut updates = Vec::with_capacity(detections.len());
        let mut matched_det = vec![false; detections.len()];
        let mut matched_tracks = std::collections::HashSet::with_capacity(assignments.len());

        // 1. 匹配成功 → 更新轨迹
        for (track_id, det_idx) in assignments {
            if let Some(track) = self.tracks.get_mut(&track_id) {
                let was_tentative = track.status == TrackStatus::Tentative;
                track.hit(frame_id, timestamp, &detections[det_idx], self.confirm_hits);
                if was_tentative && track.status == TrackStatus::Confirmed {
                    tracing::debug!(track_id, frame_id, "轨迹确认");
                }
                updates.push(track.to_update(frame_id));
                matched_det[det_idx] = true;
                matched_tracks.insert(track_id);
            }
        }

        // 2. 未匹配的轨迹 → 累计丢失, 超限后删除
        let mut lost = Vec::new();
        for (track_id, track) in self.tracks.iter_mut() {
            if matched_tracks.contains(track_id) {
                continue;
            }
            track.miss();
            if track.miss_streak > self.max_misses {
                track.status = TrackStatus::Lost;
                updates.push(track.to_update(frame_id));
                lost.push(*track_id);
            }
        }
        for track_id in lost {
            self.tracks.remove(&track_id);
            tracing::debug!(track_id, frame_id, "轨迹丢失");
        }

        // 3. 未匹配的检测 → 新建轨迹
        for (det_idx, det) in detections.iter().enumerate() {
            if matched_det[det_idx] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            let track = Track::new(id, frame_id, timestamp, det, self.confirm_hits);
            updates.push(track.to_update(frame_id));
            self.tracks.insert(id, track);
        }

        updates.sort_by_key(|u| u.track_id);
        updates
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

// ========== 工具函数 ==========

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = bbox1.area() + bbox2.area() - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}
