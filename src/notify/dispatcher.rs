// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 告警分发 (Dispatcher)
//!
//! 单条告警的完整投递: 去重 → 限流 → 发送 → 失败重试。
//! 可被多个工作线程共享 (`&self`), 内部状态用 parking_lot 锁保护。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::Clock;
use crate::config::NotifierConfig;
use crate::error::DeliveryError;
use crate::events::EventId;

use super::limiter::SlidingWindowLimiter;
use super::metrics::NotifierMetrics;
use super::retry::{Delivery, RetryPolicy, Step};
use super::{Ack, AlertMessage};

/// 可中断等待的最大分片
const WAIT_SLICE: Duration = Duration::from_millis(500);

/// 外部消息通道
pub trait AlertTransport: Send + Sync {
    fn name(&self) -> &str;

    /// 发送一条告警, 成功时返回通道侧消息ID (若有)
    fn send_alert(
        &self,
        chat_target: &str,
        image: Option<&[u8]>,
        caption: &str,
    ) -> Result<Option<i64>, DeliveryError>;
}

pub struct Dispatcher {
    transport: Arc<dyn AlertTransport>,
    clock: Arc<dyn Clock>,
    chat_target: String,
    policy: RetryPolicy,
    min_realert_interval: f64,
    limiter: Mutex<SlidingWindowLimiter>,
    /// 事件ID → 最近一次投递开始时间
    recent: Mutex<HashMap<EventId, f64>>,
    rng: Mutex<StdRng>,
    metrics: Arc<NotifierMetrics>,
    aborted: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        config: &NotifierConfig,
        transport: Arc<dyn AlertTransport>,
        clock: Arc<dyn Clock>,
        chat_target: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            clock,
            chat_target: chat_target.into(),
            policy: RetryPolicy::from_config(config),
            min_realert_interval: config.min_realert_interval_seconds,
            limiter: Mutex::new(SlidingWindowLimiter::per_minute(config.max_alerts_per_minute)),
            recent: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            metrics: Arc::new(NotifierMetrics::default()),
            aborted: AtomicBool::new(false),
        }
    }

    /// 固定抖动随机种子 (可复现)
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn metrics(&self) -> Arc<NotifierMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// 停止一切等待中的投递 (关闭超时后调用)
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// 投递一条告警 (阻塞直到成功、失败或被中止)
    pub fn dispatch(&self, alert: &AlertMessage) -> Result<Ack, DeliveryError> {
        let event_id = alert.event_id;

        // 1. 去重
        if !self.reserve(event_id) {
            NotifierMetrics::incr(&self.metrics.deduplicated);
            tracing::info!(event_id, "🔁 重复告警已抑制");
            return Err(DeliveryError::Duplicate(event_id));
        }

        let result = self.deliver(alert);
        match &result {
            Ok(ack) => {
                NotifierMetrics::incr(&self.metrics.delivered);
                tracing::info!(
                    event_id,
                    attempts = ack.attempts,
                    message_id = ?ack.message_id,
                    transport = self.transport.name(),
                    "📨 告警已发送"
                );
            }
            Err(DeliveryError::Abandoned) => {
                self.recent.lock().remove(&event_id);
                NotifierMetrics::incr(&self.metrics.abandoned);
                tracing::warn!(event_id, "⏹️  关闭超时, 告警放弃投递");
            }
            Err(e) => {
                self.recent.lock().remove(&event_id);
                NotifierMetrics::incr(&self.metrics.failed);
                tracing::error!(event_id, error = %e, "❌ 告警投递失败");
            }
        }
        result
    }

    fn deliver(&self, alert: &AlertMessage) -> Result<Ack, DeliveryError> {
        let caption = alert.caption();
        let mut delivery = Delivery::new(&self.policy);

        loop {
            self.acquire_slot()?;
            let outcome = self
                .transport
                .send_alert(&self.chat_target, alert.image(), &caption);

            let step = {
                let mut rng = self.rng.lock();
                delivery.record(outcome, &mut *rng)
            };
            match step {
                Step::Done(result) => return result,
                Step::Wait(backoff) => {
                    NotifierMetrics::incr(&self.metrics.retries);
                    tracing::warn!(
                        event_id = alert.event_id,
                        state = ?delivery.state(),
                        backoff_ms = backoff.as_millis() as u64,
                        "⚠️  发送失败, 稍后重试"
                    );
                    self.pause(backoff)?;
                }
            }
        }
    }

    /// 去重窗口内已有投递则返回 false
    fn reserve(&self, event_id: EventId) -> bool {
        let now = self.clock.now();
        let mut recent = self.recent.lock();
        recent.retain(|_, t| now - *t < self.min_realert_interval);
        if recent.contains_key(&event_id) {
            return false;
        }
        recent.insert(event_id, now);
        true
    }

    /// 等待限流名额 (每次发送尝试占用一个)
    fn acquire_slot(&self) -> Result<(), DeliveryError> {
        loop {
            if self.is_aborted() {
                return Err(DeliveryError::Abandoned);
            }
            let wait = match self.limiter.lock().try_acquire(self.clock.now()) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            tracing::debug!(wait_s = wait, "⏳ 达到限流上限, 等待");
            self.clock
                .sleep(Duration::from_secs_f64(wait.max(0.001)).min(WAIT_SLICE));
        }
    }

    /// 分片等待, 期间可被中止
    fn pause(&self, total: Duration) -> Result<(), DeliveryError> {
        let mut left = total;
        while !left.is_zero() {
            if self.is_aborted() {
                return Err(DeliveryError::Abandoned);
            }
            let slice = left.min(WAIT_SLICE);
            self.clock.sleep(slice);
            left -= slice;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detection::types::BBox;
    use std::collections::VecDeque;

    /// 按脚本返回结果, 记录每次发送的时间
    struct Scripted {
        clock: Arc<ManualClock>,
        script: Mutex<VecDeque<Result<Option<i64>, DeliveryError>>>,
        sent_at: Mutex<Vec<f64>>,
    }

    impl Scripted {
        fn new(clock: Arc<ManualClock>, script: Vec<Result<Option<i64>, DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                clock,
                script: Mutex::new(script.into()),
                sent_at: Mutex::new(Vec::new()),
            })
        }
    }

    impl AlertTransport for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn send_alert(&self, _: &str, _: Option<&[u8]>, _: &str) -> Result<Option<i64>, DeliveryError> {
            self.sent_at.lock().push(self.clock.now());
            self.script.lock().pop_front().unwrap_or(Ok(None))
        }
    }

    fn alert(event_id: EventId) -> AlertMessage {
        AlertMessage {
            event_id,
            frame_id: 1,
            snapshot: None,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            confidence: 0.9,
            timestamp: 0.0,
            raised_at: chrono::Utc::now(),
            location: "test".into(),
            track_count: 1,
        }
    }

    fn dispatcher(config: &NotifierConfig, transport: Arc<Scripted>, clock: Arc<ManualClock>) -> Dispatcher {
        Dispatcher::new(config, transport, clock, "chat").with_seed(3)
    }

    #[test]
    fn duplicate_within_interval_is_suppressed() {
        let clock = Arc::new(ManualClock::new(0.0));
        let transport = Scripted::new(clock.clone(), vec![]);
        let d = dispatcher(&NotifierConfig::default(), transport.clone(), clock.clone());

        assert!(d.dispatch(&alert(1)).is_ok());
        assert_eq!(d.dispatch(&alert(1)), Err(DeliveryError::Duplicate(1)));
        assert!(d.dispatch(&alert(2)).is_ok());

        clock.advance(61.0);
        assert!(d.dispatch(&alert(1)).is_ok());
        assert_eq!(transport.sent_at.lock().len(), 3);
        assert_eq!(d.metrics().snapshot().deduplicated, 1);
    }

    #[test]
    fn transient_errors_are_retried_with_backoff() {
        let clock = Arc::new(ManualClock::new(0.0));
        let transport = Scripted::new(
            clock.clone(),
            vec![
                Err(DeliveryError::Transient("502".into())),
                Err(DeliveryError::Transient("timeout".into())),
                Ok(Some(5)),
            ],
        );
        let config = NotifierConfig {
            jitter_ratio: 0.0,
            ..NotifierConfig::default()
        };
        let d = dispatcher(&config, transport.clone(), clock.clone());

        let ack = d.dispatch(&alert(1)).unwrap();
        assert_eq!(ack, Ack { message_id: Some(5), attempts: 3 });

        // 0.5s, 1.0s 退避
        let sent = transport.sent_at.lock().clone();
        assert_eq!(sent.len(), 3);
        assert!((sent[1] - sent[0] - 0.5).abs() < 1e-6);
        assert!((sent[2] - sent[1] - 1.0).abs() < 1e-6);

        let m = d.metrics().snapshot();
        assert_eq!((m.delivered, m.retries, m.failed), (1, 2, 0));
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let clock = Arc::new(ManualClock::new(0.0));
        let transport = Scripted::new(clock.clone(), vec![Err(DeliveryError::Permanent("401 Unauthorized".into()))]);
        let d = dispatcher(&NotifierConfig::default(), transport.clone(), clock);

        assert!(matches!(d.dispatch(&alert(1)), Err(DeliveryError::Permanent(_))));
        assert_eq!(transport.sent_at.lock().len(), 1);
        assert_eq!(d.metrics().snapshot().failed, 1);

        // 失败后不占用去重窗口
        assert!(d.dispatch(&alert(1)).is_ok());
    }

    #[test]
    fn retries_are_bounded() {
        let clock = Arc::new(ManualClock::new(0.0));
        let script = (0..10).map(|_| Err(DeliveryError::Transient("503".into()))).collect();
        let transport = Scripted::new(clock.clone(), script);
        let config = NotifierConfig {
            max_retries: 2,
            ..NotifierConfig::default()
        };
        let d = dispatcher(&config, transport.clone(), clock);

        assert!(matches!(
            d.dispatch(&alert(1)),
            Err(DeliveryError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(transport.sent_at.lock().len(), 3);
    }

    #[test]
    fn rate_limit_waits_instead_of_dropping() {
        let clock = Arc::new(ManualClock::new(0.0));
        let transport = Scripted::new(clock.clone(), vec![]);
        let config = NotifierConfig {
            max_alerts_per_minute: 2,
            ..NotifierConfig::default()
        };
        let d = dispatcher(&config, transport.clone(), clock);

        for id in 1..=5 {
            assert!(d.dispatch(&alert(id)).is_ok());
        }
        let sent = transport.sent_at.lock().clone();
        assert_eq!(sent.len(), 5);
        for (i, &start) in sent.iter().enumerate() {
            let in_window = sent[i..].iter().filter(|&&t| t - start < 60.0).count();
            assert!(in_window <= 2);
        }
    }

    #[test]
    fn abort_abandons_waiting_delivery() {
        let clock = Arc::new(ManualClock::new(0.0));
        let transport = Scripted::new(clock.clone(), vec![]);
        let d = dispatcher(&NotifierConfig::default(), transport.clone(), clock);
        d.abort();
        assert_eq!(d.dispatch(&alert(1)), Err(DeliveryError::Abandoned));
        assert!(transport.sent_at.lock().is_empty());
        assert_eq!(d.metrics().snapshot().abandoned, 1);
    }
}
