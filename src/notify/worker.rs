// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 告警工作线程池 (Notifier)
//! 职责: 有界FIFO队列 → N 个工作线程 → Dispatcher
//!
//! - 队列满: 生产者最多阻塞 `enqueue_timeout_ms`, 之后丢弃并记录 (QueueOverflow)
//! - 事件过期: 队列中尚未发送的告警作废
//! - 关闭: 停止接收, 在 `drain_timeout_ms` 内排空队列, 超时后放弃剩余告警

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::NotifierConfig;
use crate::error::QueueOverflow;
use crate::events::EventId;

use super::dispatcher::Dispatcher;
use super::metrics::{MetricsSnapshot, NotifierMetrics};
use super::{AlertMessage, AlertSink};

/// 队列中各事件的待发数量与作废标记
#[derive(Debug, Default)]
struct Ledger {
    queued: HashMap<EventId, usize>,
    cancelled: HashSet<EventId>,
}

impl Ledger {
    fn push(&mut self, event_id: EventId) {
        *self.queued.entry(event_id).or_insert(0) += 1;
    }

    /// 出队一条; 返回该条是否已作废
    fn pop(&mut self, event_id: EventId) -> bool {
        let cancelled = self.cancelled.contains(&event_id);
        if let Some(n) = self.queued.get_mut(&event_id) {
            *n -= 1;
            if *n == 0 {
                self.queued.remove(&event_id);
                self.cancelled.remove(&event_id);
            }
        }
        cancelled
    }

    fn cancel(&mut self, event_id: EventId) -> bool {
        if self.queued.contains_key(&event_id) {
            self.cancelled.insert(event_id)
        } else {
            false
        }
    }
}

pub struct Notifier {
    tx: Option<Sender<AlertMessage>>,
    capacity: usize,
    enqueue_timeout: Duration,
    drain_timeout: Duration,
    ledger: Arc<Mutex<Ledger>>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<NotifierMetrics>,
    workers: Vec<JoinHandle<()>>,
}

impl Notifier {
    /// 启动 `concurrency` 个工作线程
    pub fn start(config: &NotifierConfig, dispatcher: Dispatcher) -> crate::Result<Self> {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<AlertMessage>(capacity);
        let dispatcher = Arc::new(dispatcher);
        let metrics = dispatcher.metrics();
        let ledger = Arc::new(Mutex::new(Ledger::default()));

        let mut workers = Vec::with_capacity(config.concurrency.max(1));
        for i in 0..config.concurrency.max(1) {
            let rx = rx.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let ledger = Arc::clone(&ledger);
            let handle = std::thread::Builder::new()
                .name(format!("notifier-{i}"))
                .spawn(move || worker_loop(i, rx, dispatcher, ledger))?;
            workers.push(handle);
        }

        tracing::info!(
            workers = workers.len(),
            capacity,
            transport = dispatcher.transport_name(),
            "✅ 告警线程启动"
        );

        Ok(Self {
            tx: Some(tx),
            capacity,
            enqueue_timeout: config.enqueue_timeout(),
            drain_timeout: config.drain_timeout(),
            ledger,
            dispatcher,
            metrics,
            workers,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 协作式关闭, 返回最终统计
    pub fn shutdown(&mut self) -> MetricsSnapshot {
        // 关闭队列: 工作线程取完剩余告警后退出
        if self.tx.take().is_none() && self.workers.is_empty() {
            return self.metrics();
        }

        let deadline = Instant::now() + self.drain_timeout;
        while Instant::now() < deadline && self.workers.iter().any(|w| !w.is_finished()) {
            std::thread::sleep(Duration::from_millis(10));
        }

        if self.workers.iter().any(|w| !w.is_finished()) {
            tracing::warn!(
                pending = self.metrics.queue_depth.load(std::sync::atomic::Ordering::Relaxed),
                "⏹️  排空超时, 放弃剩余告警"
            );
            self.dispatcher.abort();
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("❌ 告警线程异常退出");
            }
        }

        let snapshot = self.metrics();
        tracing::info!(
            delivered = snapshot.delivered,
            abandoned = snapshot.abandoned,
            "🛑 告警线程已停止"
        );
        snapshot
    }
}

impl AlertSink for Notifier {
    fn submit(&mut self, alert: AlertMessage) -> Result<(), QueueOverflow> {
        let event_id = alert.event_id;
        let Some(tx) = &self.tx else {
            NotifierMetrics::incr(&self.metrics.dropped);
            tracing::warn!(event_id, "⚠️  告警队列已关闭, 告警丢弃");
            return Err(QueueOverflow::Closed(event_id));
        };

        self.ledger.lock().push(event_id);
        self.metrics.enqueued();

        match tx.send_timeout(alert, self.enqueue_timeout) {
            Ok(()) => {
                NotifierMetrics::incr(&self.metrics.submitted);
                tracing::debug!(event_id, "📥 告警入队");
                Ok(())
            }
            Err(e) => {
                self.ledger.lock().pop(event_id);
                self.metrics.dequeued();
                NotifierMetrics::incr(&self.metrics.dropped);
                let err = match e {
                    SendTimeoutError::Timeout(_) => QueueOverflow::Full {
                        event_id,
                        capacity: self.capacity,
                    },
                    SendTimeoutError::Disconnected(_) => QueueOverflow::Closed(event_id),
                };
                tracing::warn!(event_id, error = %err, "⚠️  告警队列溢出");
                Err(err)
            }
        }
    }

    fn supersede(&mut self, event_id: EventId) {
        if self.ledger.lock().cancel(event_id) {
            tracing::info!(event_id, "🗑️  事件已结束, 排队中的告警作废");
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if self.tx.is_some() || !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(
    index: usize,
    rx: Receiver<AlertMessage>,
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<Mutex<Ledger>>,
) {
    let metrics = dispatcher.metrics();
    tracing::debug!(worker = index, "告警线程等待数据...");

    while let Ok(alert) = rx.recv() {
        metrics.dequeued();
        let cancelled = ledger.lock().pop(alert.event_id);

        if cancelled {
            NotifierMetrics::incr(&metrics.superseded);
            tracing::debug!(event_id = alert.event_id, "跳过已作废告警");
            continue;
        }
        if dispatcher.is_aborted() {
            NotifierMetrics::incr(&metrics.abandoned);
            continue;
        }

        // 结果已在 Dispatcher 内记录
        let _ = dispatcher.dispatch(&alert);
    }

    tracing::debug!(worker = index, "告警线程退出");
}
