// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 火情事件管理 (Fire Event Manager)
//!
//! 把持续存在的轨迹转换为去抖后的火情事件:
//! Candidate → Confirmed → Alerted → Expired
//!
//! - 轨迹首次 Confirmed 且与已有事件不重叠 → 新建 Candidate
//! - Candidate 持续支持 `min_sustained_seconds` (按时间戳, 不按帧数) → Confirmed → Alerted
//!   (支持 = 本帧有 Confirmed 成员轨迹命中; 任一帧无命中则重新计时)
//! - Candidate 的轨迹全部丢失 → Expired (去抖, 抑制闪烁误报)
//! - Alerted 超过 `event_idle_timeout_seconds` 无更新 → Expired
//! - Expired 为终态, 同一位置再次检测会创建新事件

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::EventConfig;
use crate::detection::tracker::compute_iou;
use crate::detection::types::{BBox, FrameId, TrackId, TrackStatus, TrackUpdate};

/// 事件ID (进程生命周期内不复用)
pub type EventId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventState {
    Candidate,
    Confirmed,
    Alerted,
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Created,
    Confirmed,
    ShouldAlert,
    Expired,
}

/// 事件状态变化 (Event Manager → Notifier)
#[derive(Clone, Debug, PartialEq)]
pub struct EventTransition {
    pub kind: TransitionKind,
    pub frame_id: FrameId,
    pub timestamp: f64,
    /// 变化发生时的事件快照
    pub event: FireEvent,
}

impl EventTransition {
    pub fn event_id(&self) -> EventId {
        self.event.id
    }
}

/// 事件中的一条成员轨迹
#[derive(Clone, Debug, PartialEq)]
struct MemberTrack {
    bbox: BBox,
    /// 未被跟踪器报告为 Lost
    active: bool,
}

/// 火情事件
#[derive(Clone, Debug, PartialEq)]
pub struct FireEvent {
    pub id: EventId,
    pub state: EventState,
    /// 曾经或当前提供证据的轨迹
    pub associated_track_ids: BTreeSet<TrackId>,
    pub first_seen: f64,
    pub last_seen: f64,
    /// 连续支持的起点 (中断后清空, 证据恢复时重新计时)
    pub supported_since: Option<f64>,
    /// 所有成员轨迹检测 (含 Tentative 阶段) 的最高置信度
    pub peak_confidence: f32,
    /// 峰值置信度出现的帧 (用于挑选告警快照)
    pub peak_frame: FrameId,
    pub peak_bbox: BBox,
    /// 峰值所属轨迹
    pub peak_track: TrackId,
    /// 最近一次更新的边界框
    pub last_bbox: BBox,
    members: BTreeMap<TrackId, MemberTrack>,
    /// 最近一次有 Confirmed 成员命中的帧
    supported_frame: Option<FrameId>,
}

impl FireEvent {
    fn new(id: EventId, update: &TrackUpdate, timestamp: f64) -> Self {
        Self {
            id,
            state: EventState::Candidate,
            associated_track_ids: BTreeSet::new(),
            first_seen: timestamp,
            last_seen: timestamp,
            supported_since: None,
            peak_confidence: update.peak.confidence,
            peak_frame: update.peak.frame_id,
            peak_bbox: update.peak.bbox,
            peak_track: update.track_id,
            last_bbox: update.bbox,
            members: BTreeMap::new(),
            supported_frame: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != EventState::Expired
    }

    /// 当前未丢失的成员轨迹数
    pub fn active_track_count(&self) -> usize {
        self.members.values().filter(|m| m.active).count()
    }

    /// 本帧是否有 Confirmed 成员轨迹命中
    fn is_supported_at(&self, frame_id: FrameId) -> bool {
        self.supported_frame == Some(frame_id)
    }

    /// 与所有成员轨迹最近边界框的最大 IOU
    fn best_overlap(&self, bbox: &BBox) -> f32 {
        self.members
            .values()
            .map(|m| compute_iou(&m.bbox, bbox))
            .fold(0.0, f32::max)
    }

    fn attach(&mut self, update: &TrackUpdate, timestamp: f64) {
        self.associated_track_ids.insert(update.track_id);
        self.members.insert(
            update.track_id,
            MemberTrack {
                bbox: update.bbox,
                active: true,
            },
        );
        self.observe(update, timestamp);
    }

    fn observe(&mut self, update: &TrackUpdate, timestamp: f64) {
        let Some(member) = self.members.get_mut(&update.track_id) else {
            return;
        };

        if update.status == TrackStatus::Lost {
            member.active = false;
            return;
        }

        member.bbox = update.bbox;
        // 跟踪器只上报命中、新建与丢失的轨迹, 非 Lost 的更新即为本帧命中
        if update.status == TrackStatus::Confirmed {
            self.supported_frame = Some(update.frame_id);
            if self.supported_since.is_none() {
                self.supported_since = Some(timestamp);
            }
        }

        self.last_seen = timestamp;
        self.last_bbox = update.bbox;
        if update.peak.confidence > self.peak_confidence {
            self.peak_confidence = update.peak.confidence;
            self.peak_frame = update.peak.frame_id;
            self.peak_bbox = update.peak.bbox;
            self.peak_track = update.track_id;
        }
    }
}

/// 事件统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventStats {
    pub created: u64,
    pub alerted: u64,
    pub expired: u64,
    /// 未确认即过期 (被去抖抑制)
    pub suppressed: u64,
    /// 轨迹并入已有事件的次数
    pub merged: u64,
}

/// 火情事件管理器
pub struct FireEventManager {
    config: EventConfig,
    /// 未过期事件
    events: BTreeMap<EventId, FireEvent>,
    /// 轨迹 → 所属事件
    track_index: HashMap<TrackId, EventId>,
    next_id: EventId,
    stats: EventStats,
}

impl FireEventManager {
    pub fn new(config: &EventConfig) -> Self {
        Self {
            config: config.clone(),
            events: BTreeMap::new(),
            track_index: HashMap::new(),
            next_id: 1,
            stats: EventStats::default(),
        }
    }

    pub fn get(&self, id: EventId) -> Option<&FireEvent> {
        self.events.get(&id)
    }

    /// 未过期事件 (按ID升序)
    pub fn live_events(&self) -> impl Iterator<Item = &FireEvent> {
        self.events.values()
    }

    pub fn event_for_track(&self, track_id: TrackId) -> Option<&FireEvent> {
        self.track_index
            .get(&track_id)
            .and_then(|id| self.events.get(id))
    }

    pub fn stats(&self) -> EventStats {
        self.stats
    }

    /// 处理一帧的轨迹更新, 返回本帧发生的状态变化
    pub fn update(
        &mut self,
        frame_id: FrameId,
        timestamp: f64,
        updates: &[TrackUpdate],
    ) -> Vec<EventTransition> {
        let mut transitions = Vec::new();

        // 1. 轨迹证据归并
        for update in updates {
            if let Some(&event_id) = self.track_index.get(&update.track_id) {
                if let Some(event) = self.events.get_mut(&event_id) {
                    event.observe(update, timestamp);
                }
                if update.status == TrackStatus::Lost {
                    self.track_index.remove(&update.track_id);
                }
                continue;
            }

            match update.status {
                TrackStatus::Confirmed => {
                    if let Some(event_id) = self.merge_target(&update.bbox, false) {
                        self.attach(event_id, update, timestamp);
                        self.stats.merged += 1;
                    } else {
                        let event_id = self.next_id;
                        self.next_id += 1;
                        self.events
                            .insert(event_id, FireEvent::new(event_id, update, timestamp));
                        self.attach(event_id, update, timestamp);
                        self.stats.created += 1;
                        tracing::info!(event_id, track_id = update.track_id, frame_id, "🆕 新火情候选");
                        self.push(&mut transitions, event_id, TransitionKind::Created, frame_id, timestamp);
                    }
                }
                TrackStatus::Tentative => {
                    // 已告警事件附近的新轨迹视为重新捕获, 立即刷新 last_seen
                    if let Some(event_id) = self.merge_target(&update.bbox, true) {
                        self.attach(event_id, update, timestamp);
                        self.stats.merged += 1;
                        tracing::debug!(event_id, track_id = update.track_id, "轨迹重新捕获");
                    }
                }
                TrackStatus::Lost => {}
            }
        }

        // 2. 生命周期推进
        let mut expired = Vec::new();
        for event in self.events.values_mut() {
            match event.state {
                EventState::Candidate => {
                    if event.active_track_count() == 0 {
                        event.state = EventState::Expired;
                        self.stats.suppressed += 1;
                        tracing::debug!(event_id = event.id, "候选事件未确认即结束");
                    } else if !event.is_supported_at(frame_id) {
                        if event.supported_since.take().is_some() {
                            tracing::debug!(event_id = event.id, frame_id, "候选事件支持中断, 重新计时");
                        }
                    } else if event
                        .supported_since
                        .is_some_and(|since| timestamp - since >= self.config.min_sustained_seconds)
                    {
                        event.state = EventState::Confirmed;
                        transitions.push(transition(event, TransitionKind::Confirmed, frame_id, timestamp));

                        event.state = EventState::Alerted;
                        self.stats.alerted += 1;
                        tracing::info!(
                            event_id = event.id,
                            frame_id,
                            peak = event.peak_confidence,
                            "🔥 火情确认, 触发告警"
                        );
                        transitions.push(transition(event, TransitionKind::ShouldAlert, frame_id, timestamp));
                    }
                }
                EventState::Confirmed | EventState::Alerted => {
                    if timestamp - event.last_seen >= self.config.event_idle_timeout_seconds {
                        event.state = EventState::Expired;
                        tracing::info!(event_id = event.id, frame_id, "✅ 火情事件结束");
                    }
                }
                EventState::Expired => {}
            }

            if event.state == EventState::Expired {
                transitions.push(transition(event, TransitionKind::Expired, frame_id, timestamp));
                expired.push(event.id);
            }
        }

        // 3. 清理过期事件
        for event_id in expired {
            if let Some(event) = self.events.remove(&event_id) {
                for track_id in &event.associated_track_ids {
                    if self.track_index.get(track_id) == Some(&event_id) {
                        self.track_index.remove(track_id);
                    }
                }
                self.stats.expired += 1;
            }
        }

        transitions
    }

    /// 查找可并入的未过期事件: IOU 最大者, 同 IOU 时事件ID小者优先
    fn merge_target(&self, bbox: &BBox, alerted_only: bool) -> Option<EventId> {
        let mut best: Option<(f32, EventId)> = None;
        for event in self.events.values() {
            if !event.is_live() || (alerted_only && event.state != EventState::Alerted) {
                continue;
            }
            let iou = event.best_overlap(bbox);
            if iou < self.config.merge_iou_threshold {
                continue;
            }
            // 按ID升序遍历, 严格大于才替换
            if best.map_or(true, |(b, _)| iou > b) {
                best = Some((iou, event.id));
            }
        }
        best.map(|(_, id)| id)
    }

    fn attach(&mut self, event_id: EventId, update: &TrackUpdate, timestamp: f64) {
        if let Some(event) = self.events.get_mut(&event_id) {
            event.attach(update, timestamp);
            self.track_index.insert(update.track_id, event_id);
        }
    }

    fn push(
        &self,
        transitions: &mut Vec<EventTransition>,
        event_id: EventId,
        kind: TransitionKind,
        frame_id: FrameId,
        timestamp: f64,
    ) {
        if let Some(event) = self.events.get(&event_id) {
            transitions.push(transition(event, kind, frame_id, timestamp));
        }
    }
}

fn transition(event: &FireEvent, kind: TransitionKind, frame_id: FrameId, timestamp: f64) -> EventTransition {
    EventTransition {
        kind,
        frame_id,
        timestamp,
        event: event.clone(),
    }
}
