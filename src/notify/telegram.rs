// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Telegram Bot 通道
//!
//! - 有快照: `sendPhoto` (multipart/form-data, Markdown caption)
//! - 无快照: `sendMessage`
//! - 未启用或凭证缺失: 用 `LogTransport` 只记录日志, 不报错

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::config::TelegramConfig;
use crate::error::DeliveryError;

use super::dispatcher::AlertTransport;

pub struct TelegramTransport {
    agent: ureq::Agent,
    api_base: String,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build();
        Self {
            agent,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    fn send_photo(&self, chat_id: &str, jpeg: &[u8], caption: &str) -> Result<ureq::Response, ureq::Error> {
        let boundary = format!("----fire-sentinel-{:016x}", rand::random::<u64>());
        let body = multipart_body(&boundary, chat_id, caption, jpeg);
        self.agent
            .post(&self.endpoint("sendPhoto"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
    }

    fn send_message(&self, chat_id: &str, text: &str) -> Result<ureq::Response, ureq::Error> {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        self.agent
            .post(&self.endpoint("sendMessage"))
            .set("Content-Type", "application/json")
            .send_string(&payload.to_string())
    }
}

impl AlertTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send_alert(
        &self,
        chat_target: &str,
        image: Option<&[u8]>,
        caption: &str,
    ) -> Result<Option<i64>, DeliveryError> {
        let response = match image {
            Some(jpeg) => self.send_photo(chat_target, jpeg, caption),
            None => self.send_message(chat_target, caption),
        };

        match response {
            Ok(resp) => match serde_json::from_reader::<_, TelegramReply>(resp.into_reader()) {
                Ok(reply) if reply.ok => Ok(reply.result.map(|m| m.message_id)),
                Ok(reply) => Err(DeliveryError::Permanent(
                    reply.description.unwrap_or_else(|| "telegram returned ok=false".into()),
                )),
                Err(e) => {
                    // 已发出, 重试会造成重复消息
                    tracing::warn!(error = %e, "⚠️  Telegram 响应解析失败");
                    Ok(None)
                }
            },
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(classify_status(code, &body))
            }
            Err(ureq::Error::Transport(t)) => Err(DeliveryError::Transient(t.to_string())),
        }
    }
}

/// HTTP 状态码分类: 429 与 5xx 可重试, 其余 4xx 不重试
pub fn classify_status(code: u16, body: &str) -> DeliveryError {
    let description = serde_json::from_str::<TelegramReply>(body)
        .ok()
        .and_then(|r| r.description)
        .unwrap_or_else(|| body.chars().take(200).collect());
    let message = format!("HTTP {code}: {description}");
    if code == 429 || code >= 500 {
        DeliveryError::Transient(message)
    } else {
        DeliveryError::Permanent(message)
    }
}

fn multipart_body(boundary: &str, chat_id: &str, caption: &str, jpeg: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(jpeg.len() + caption.len() + 512);
    let mut field = |name: &str, value: &str| {
        let _ = write!(
            body,
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        );
    };
    field("chat_id", chat_id);
    field("caption", caption);
    field("parse_mode", "Markdown");

    let _ = write!(
        body,
        "--{boundary}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"fire.jpg\"\r\n\
         Content-Type: image/jpeg\r\n\r\n"
    );
    body.extend_from_slice(jpeg);
    let _ = write!(body, "\r\n--{boundary}--\r\n");
    body
}

/// 仅记录日志的通道 (--dry-run 或 Telegram 未配置)
#[derive(Debug, Default)]
pub struct LogTransport {
    sent: AtomicU64,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl AlertTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    fn send_alert(
        &self,
        chat_target: &str,
        image: Option<&[u8]>,
        caption: &str,
    ) -> Result<Option<i64>, DeliveryError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            chat = chat_target,
            image_bytes = image.map_or(0, <[u8]>::len),
            "📝 [dry-run] 告警 #{n}:\n{caption}"
        );
        Ok(None)
    }
}
