// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 火情处理流水线 (Fire Pipeline)
///
/// 帧同步执行, 单线程持有跟踪器与事件管理器:
/// - Detector:      帧 → 原始检测 (失败时按零检测处理)
/// - Filter:        边界校验 + 火焰类别过滤
/// - Tracker:       检测 → TrackUpdate
/// - Event Manager: TrackUpdate → EventTransition
/// - Sink:          ShouldAlert → AlertMessage 入队; Expired → 作废排队中的告警
pub mod snapshot;
pub mod source;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::SentinelConfig;
use crate::detection::{
    BBox, DetectionFilter, Detector, FrameId, IouTracker, TrackId, TrackStatus, TrackUpdate, Tracker,
};
use crate::events::{EventId, EventTransition, FireEventManager, TransitionKind};
use crate::notify::{AlertMessage, AlertSink, Snapshot};

pub use source::{Frame, FrameImage, FrameSource, ReplaySource};

// ========== 流水线消息类型 ==========

/// 单帧处理结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub frame_id: FrameId,
    /// 通过过滤的检测数
    pub detections: usize,
    pub track_updates: Vec<TrackUpdate>,
    pub transitions: Vec<EventTransition>,
}

/// 运行统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames: u64,
    /// 检测器失败 (按零检测处理)
    pub inference_failures: u64,
    /// 时间戳回退而跳过
    pub frames_out_of_order: u64,
    /// 收到停止信号后拒绝的帧
    pub frames_refused: u64,
    pub detections_accepted: u64,
    pub detections_rejected: u64,
    pub detections_ignored: u64,
    pub events_created: u64,
    pub events_alerted: u64,
    pub events_expired: u64,
    pub alerts_submitted: u64,
    pub alerts_dropped: u64,
}

/// 协作式停止信号
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 峰值帧图像及该帧的全部检测框 (告警时才编码)
#[derive(Clone, Debug)]
struct PeakImage {
    frame_id: FrameId,
    image: FrameImage,
    detections: Vec<BBox>,
}

// ========== 流水线 ==========

pub struct FirePipeline<D: Detector, S: AlertSink> {
    detector: D,
    filter: DetectionFilter,
    tracker: IouTracker,
    events: FireEventManager,
    sink: S,
    /// 事件 → 峰值帧
    peak_images: HashMap<EventId, PeakImage>,
    /// 轨迹 → 峰值帧, 轨迹尚未并入事件时也保留
    track_peaks: HashMap<TrackId, PeakImage>,
    location: String,
    save_dir: Option<PathBuf>,
    last_timestamp: Option<f64>,
    shutdown: ShutdownSignal,
    stats: PipelineStats,
}

impl<D: Detector, S: AlertSink> FirePipeline<D, S> {
    pub fn new(config: &SentinelConfig, detector: D, sink: S) -> Self {
        Self {
            detector,
            filter: DetectionFilter::new(&config.detector),
            tracker: IouTracker::new(&config.tracker),
            events: FireEventManager::new(&config.event),
            sink,
            peak_images: HashMap::new(),
            track_peaks: HashMap::new(),
            location: config.notifier.location_label.clone(),
            save_dir: config.event.save_dir.clone(),
            last_timestamp: None,
            shutdown: ShutdownSignal::new(),
            stats: PipelineStats::default(),
        }
    }

    /// 停止信号句柄 (可交给信号处理线程)
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn tracker(&self) -> &IouTracker {
        &self.tracker
    }

    pub fn events(&self) -> &FireEventManager {
        &self.events
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// 处理一帧
    pub fn process_frame(&mut self, frame: Frame) -> FrameReport {
        if self.shutdown.is_requested() {
            self.stats.frames_refused += 1;
            tracing::debug!(frame_id = frame.id, "已请求停止, 拒绝新帧");
            return FrameReport {
                frame_id: frame.id,
                ..FrameReport::default()
            };
        }
        if self.last_timestamp.is_some_and(|t| frame.timestamp < t) {
            self.stats.frames_out_of_order += 1;
            tracing::warn!(frame_id = frame.id, timestamp = frame.timestamp, "⚠️  帧时间戳回退, 跳过");
            return FrameReport {
                frame_id: frame.id,
                ..FrameReport::default()
            };
        }
        self.last_timestamp = Some(frame.timestamp);
        self.stats.frames += 1;

        // 1. 检测
        let raw = match self.detector.detect(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.inference_failures += 1;
                tracing::warn!(error = %e, detector = self.detector.name(), "⚠️  检测失败, 按零检测处理");
                Vec::new()
            }
        };

        // 2. 过滤
        let filtered = self.filter.apply(raw);
        for e in &filtered.rejected {
            tracing::warn!(frame_id = frame.id, error = %e, "⚠️  丢弃非法检测");
        }
        self.stats.detections_accepted += filtered.accepted.len() as u64;
        self.stats.detections_rejected += filtered.rejected.len() as u64;
        self.stats.detections_ignored += filtered.ignored as u64;

        // 3. 跟踪
        let track_updates = self
            .tracker
            .update(frame.id, frame.timestamp, &filtered.accepted);

        if let Some(image) = &frame.image {
            let detections: Vec<BBox> = filtered.accepted.iter().map(|d| d.bbox).collect();
            for u in track_updates.iter().filter(|u| u.peak.frame_id == frame.id) {
                self.track_peaks.insert(
                    u.track_id,
                    PeakImage {
                        frame_id: frame.id,
                        image: image.clone(),
                        detections: detections.clone(),
                    },
                );
            }
        }

        // 4. 事件
        let transitions = self.events.update(frame.id, frame.timestamp, &track_updates);
        self.refresh_peak_images(&track_updates);

        // 5. 告警
        for t in &transitions {
            match t.kind {
                TransitionKind::Created => self.stats.events_created += 1,
                TransitionKind::Confirmed => {}
                TransitionKind::ShouldAlert => {
                    self.stats.events_alerted += 1;
                    self.raise_alert(t);
                }
                TransitionKind::Expired => {
                    self.stats.events_expired += 1;
                    self.peak_images.remove(&t.event_id());
                    self.sink.supersede(t.event_id());
                }
            }
        }

        tracing::debug!(
            frame_id = frame.id,
            detections = filtered.accepted.len(),
            tracks = self.tracker.track_count(),
            transitions = transitions.len(),
            "帧处理完成"
        );

        FrameReport {
            frame_id: frame.id,
            detections: filtered.accepted.len(),
            track_updates,
            transitions,
        }
    }

    /// 峰值帧图像 (告警时才编码)
    fn refresh_peak_images(&mut self, track_updates: &[TrackUpdate]) {
        for event in self.events.live_events() {
            if self
                .peak_images
                .get(&event.id)
                .is_some_and(|p| p.frame_id == event.peak_frame)
            {
                continue;
            }
            if let Some(peak) = self.track_peaks.get(&event.peak_track) {
                if peak.frame_id == event.peak_frame {
                    self.peak_images.insert(event.id, peak.clone());
                }
            }
        }
        for u in track_updates.iter().filter(|u| u.status == TrackStatus::Lost) {
            self.track_peaks.remove(&u.track_id);
        }
    }

    fn raise_alert(&mut self, t: &EventTransition) {
        let event = &t.event;

        let snapshot = self.peak_images.get(&event.id).and_then(|peak| {
            match snapshot::encode_snapshot(&peak.image, &event.peak_bbox, &peak.detections) {
                Ok(jpeg) => Some(Snapshot {
                    frame_id: event.peak_frame,
                    jpeg: Arc::new(jpeg),
                }),
                Err(e) => {
                    tracing::warn!(event_id = event.id, error = %e, "⚠️  快照编码失败, 发送文字告警");
                    None
                }
            }
        });

        if let (Some(dir), Some(snap)) = (&self.save_dir, &snapshot) {
            match snapshot::archive(dir, event.id, snap.frame_id, &snap.jpeg) {
                Ok(path) => tracing::info!(path = %path.display(), "💾 告警快照已保存"),
                Err(e) => tracing::warn!(error = %e, "⚠️  告警快照保存失败"),
            }
        }

        let alert = AlertMessage {
            event_id: event.id,
            frame_id: event.peak_frame,
            snapshot,
            bbox: event.peak_bbox,
            confidence: event.peak_confidence,
            timestamp: t.timestamp,
            raised_at: chrono::Utc::now(),
            location: self.location.clone(),
            track_count: event.associated_track_ids.len(),
        };

        match self.sink.submit(alert) {
            Ok(()) => self.stats.alerts_submitted += 1,
            Err(e) => {
                self.stats.alerts_dropped += 1;
                tracing::error!(event_id = event.id, error = %e, "❌ 告警未能入队");
            }
        }
    }

    /// 运行到流结束或收到停止信号
    pub fn run<F: FrameSource>(&mut self, source: &mut F) -> PipelineStats {
        tracing::info!(detector = self.detector.name(), "🚀 流水线启动");
        let start = Instant::now();

        while !self.shutdown.is_requested() {
            let Some(frame) = source.next_frame() else {
                tracing::info!("📭 帧流结束");
                break;
            };
            self.process_frame(frame);
        }
        if self.shutdown.is_requested() {
            tracing::warn!(frames = self.stats.frames, "🛑 收到停止信号, 不再读取新帧");
        }

        let elapsed = start.elapsed().as_secs_f64();
        let s = self.stats;
        tracing::info!(
            frames = s.frames,
            fps = if elapsed > 0.0 { s.frames as f64 / elapsed } else { 0.0 },
            events = s.events_created,
            alerted = s.events_alerted,
            expired = s.events_expired,
            dropped_alerts = s.alerts_dropped,
            "📊 流水线统计"
        );
        s
    }
}
