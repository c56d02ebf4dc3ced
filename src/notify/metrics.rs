// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 告警投递计数

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct NotifierMetrics {
    pub submitted: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    /// 队列满或已关闭而丢弃
    pub dropped: AtomicU64,
    pub deduplicated: AtomicU64,
    /// 事件过期导致作废
    pub superseded: AtomicU64,
    pub retries: AtomicU64,
    /// 关闭时未完成
    pub abandoned: AtomicU64,
    pub queue_depth: AtomicUsize,
    pub peak_queue_depth: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub deduplicated: u64,
    pub superseded: u64,
    pub retries: u64,
    pub abandoned: u64,
    pub queue_depth: usize,
    pub peak_queue_depth: usize,
}

impl NotifierMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueued(&self) {
        let depth = self.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn dequeued(&self) {
        // 饱和减
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            submitted: load(&self.submitted),
            delivered: load(&self.delivered),
            failed: load(&self.failed),
            dropped: load(&self.dropped),
            deduplicated: load(&self.deduplicated),
            superseded: load(&self.superseded),
            retries: load(&self.retries),
            abandoned: load(&self.abandoned),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    pub fn log(&self) {
        tracing::info!(
            submitted = self.submitted,
            delivered = self.delivered,
            failed = self.failed,
            dropped = self.dropped,
            deduplicated = self.deduplicated,
            superseded = self.superseded,
            retries = self.retries,
            abandoned = self.abandoned,
            peak_queue = self.peak_queue_depth,
            "📊 告警统计"
        );
    }
}
