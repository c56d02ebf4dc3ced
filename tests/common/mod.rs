// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 集成测试公共工具
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use fire_sentinel::error::{DeliveryError, QueueOverflow};
use fire_sentinel::events::EventId;
use fire_sentinel::{
    AlertMessage, AlertSink, AlertTransport, Clock, EventTransition, Frame, ManualClock, RawDetection,
    SentinelConfig, TransitionKind,
};

pub const FIRE_BOX: [f32; 4] = [10.0, 10.0, 50.0, 50.0];

pub fn config(confirm_hits: u32, min_sustained_seconds: f64) -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.tracker.confirm_hits = confirm_hits;
    config.event.min_sustained_seconds = min_sustained_seconds;
    config
}

pub fn frame(id: u64, timestamp: f64, boxes: &[[f32; 4]]) -> Frame {
    Frame::new(id, timestamp).with_detections(boxes.iter().map(|b| RawDetection::new(*b, 0.9)).collect())
}

pub fn count(transitions: &[EventTransition], kind: TransitionKind) -> usize {
    transitions.iter().filter(|t| t.kind == kind).count()
}

/// 手动时钟, 但 sleep 会真实让出 1ms, 多个工作线程等待时交替推进
#[derive(Default)]
pub struct SteppingClock {
    inner: ManualClock,
}

impl Clock for SteppingClock {
    fn now(&self) -> f64 {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(Duration::from_millis(1));
        self.inner.sleep(duration);
    }
}

/// 记录入队的告警
#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Vec<AlertMessage>,
    pub superseded: Vec<EventId>,
}

impl AlertSink for RecordingSink {
    fn submit(&mut self, alert: AlertMessage) -> Result<(), QueueOverflow> {
        self.alerts.push(alert);
        Ok(())
    }

    fn supersede(&mut self, event_id: EventId) {
        self.superseded.push(event_id);
    }
}

#[derive(Clone, Debug)]
pub struct SentAlert {
    pub at: f64,
    pub caption: String,
    pub has_image: bool,
}

/// 内存通道: 按脚本返回结果, 脚本耗尽后全部成功
pub struct RecordingTransport {
    clock: Arc<dyn Clock>,
    script: Mutex<VecDeque<Result<Option<i64>, DeliveryError>>>,
    pub sent: Mutex<Vec<SentAlert>>,
}

impl RecordingTransport {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::scripted(clock, Vec::new())
    }

    pub fn scripted(clock: Arc<dyn Clock>, script: Vec<Result<Option<i64>, DeliveryError>>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<SentAlert> {
        self.sent.lock().clone()
    }
}

impl AlertTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn send_alert(&self, _: &str, image: Option<&[u8]>, caption: &str) -> Result<Option<i64>, DeliveryError> {
        self.sent.lock().push(SentAlert {
            at: self.clock.now(),
            caption: caption.to_string(),
            has_image: image.is_some(),
        });
        self.script.lock().pop_front().unwrap_or(Ok(None))
    }
}

/// 阻塞通道: 每次发送先通知 `started`, 再等待 `gate` 放行
pub struct GateTransport {
    started: Sender<()>,
    gate: Receiver<()>,
    pub captions: Mutex<Vec<String>>,
}

impl GateTransport {
    /// 返回 (通道, 开始通知接收端, 放行发送端)
    pub fn new() -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let transport = Arc::new(Self {
            started: started_tx,
            gate: gate_rx,
            captions: Mutex::new(Vec::new()),
        });
        (transport, started_rx, gate_tx)
    }
}

impl AlertTransport for GateTransport {
    fn name(&self) -> &str {
        "gate"
    }

    fn send_alert(&self, _: &str, _: Option<&[u8]>, caption: &str) -> Result<Option<i64>, DeliveryError> {
        let _ = self.started.send(());
        let _ = self.gate.recv();
        self.captions.lock().push(caption.to_string());
        Ok(None)
    }
}
