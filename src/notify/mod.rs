// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 告警通知 (Notifier)
//!
//! ShouldAlert → AlertMessage → 有界FIFO队列 → 工作线程 → 去重 / 限流 / 重试 → 外部消息通道
//!
//! 只有这一层会执行 I/O 并阻塞; 跟踪器与事件管理器保持纯同步计算。

pub mod dispatcher;
pub mod limiter;
pub mod metrics;
pub mod retry;
pub mod telegram;
pub mod worker;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::detection::types::{BBox, FrameId};
use crate::error::QueueOverflow;
use crate::events::EventId;

pub use dispatcher::{AlertTransport, Dispatcher};
pub use limiter::SlidingWindowLimiter;
pub use metrics::{MetricsSnapshot, NotifierMetrics};
pub use retry::{DeliveryState, RetryPolicy};
pub use telegram::{LogTransport, TelegramTransport};
pub use worker::Notifier;

/// 告警快照 (JPEG)
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub frame_id: FrameId,
    pub jpeg: Arc<Vec<u8>>,
}

/// 发往外部通道的告警消息 (自包含, 不依赖投递顺序)
#[derive(Clone, Debug, PartialEq)]
pub struct AlertMessage {
    pub event_id: EventId,
    /// 代表帧 (峰值置信度所在帧)
    pub frame_id: FrameId,
    pub snapshot: Option<Snapshot>,
    pub bbox: BBox,
    pub confidence: f32,
    /// 事件确认时的帧时间戳 (秒)
    pub timestamp: f64,
    /// 告警产生的墙钟时间
    pub raised_at: DateTime<Utc>,
    pub location: String,
    pub track_count: usize,
}

impl AlertMessage {
    /// Markdown 告警文本
    pub fn caption(&self) -> String {
        format!(
            "🔥 *FIRE ALERT*\n\
             Event: #{}\n\
             Frame: {} (t={:.1}s)\n\
             Time: {}\n\
             Confidence: {:.2}\n\
             Tracks: {}\n\
             Location: {}",
            self.event_id,
            self.frame_id,
            self.timestamp,
            self.raised_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.confidence,
            self.track_count,
            escape_markdown(&self.location)
        )
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.snapshot.as_ref().map(|s| s.jpeg.as_slice())
    }
}

/// 转义 Telegram Markdown 特殊字符: 下划线、星号、反引号、左方括号
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 投递回执
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ack {
    /// 外部通道返回的消息ID (若有)
    pub message_id: Option<i64>,
    pub attempts: u32,
}

/// 告警接收端 (流水线 → 通知器)
pub trait AlertSink {
    /// 入队; 队列满且等待超时后返回 QueueOverflow
    fn submit(&mut self, alert: AlertMessage) -> Result<(), QueueOverflow>;

    /// 事件已过期: 尚未发送的告警作废
    fn supersede(&mut self, event_id: EventId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn caption_carries_event_details() {
        let msg = AlertMessage {
            event_id: 7,
            frame_id: 42,
            snapshot: None,
            bbox: BBox::new(10.0, 10.0, 50.0, 50.0),
            confidence: 0.876,
            timestamp: 12.34,
            raised_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            location: "Ridge 3".into(),
            track_count: 2,
        };
        let caption = msg.caption();
        assert!(caption.contains("#7"));
        assert!(caption.contains("Frame: 42 (t=12.3s)"));
        assert!(caption.contains("2023-11-14 22:13:20 UTC"));
        assert!(caption.contains("0.88"));
        assert!(caption.contains("Ridge 3"));
        assert!(msg.image().is_none());
    }

    #[test]
    fn caption_escapes_markdown_in_location() {
        let msg = AlertMessage {
            event_id: 1,
            frame_id: 1,
            snapshot: None,
            bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
            confidence: 0.5,
            timestamp: 0.0,
            raised_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            location: "Ridge_3 Zone *A* [east] `x`".into(),
            track_count: 1,
        };
        let caption = msg.caption();
        assert!(caption.ends_with(r"Location: Ridge\_3 Zone \*A\* \[east] \`x\`"), "{caption}");
        // 标题的粗体标记保持不变
        assert!(caption.starts_with("🔥 *FIRE ALERT*"));
    }
}
