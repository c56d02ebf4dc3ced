// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 系统配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 完整配置 (对应 JSON 文件的顶层结构)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub event: EventConfig,
    pub notifier: NotifierConfig,
    pub telegram: TelegramConfig,
}

/// 检测过滤参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub fire_labels: Vec<String>, // 视为火焰的类别
    pub min_confidence: f32,      // 置信度过滤
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            fire_labels: vec!["fire".to_string()],
            min_confidence: 0.3,
        }
    }
}

/// 跟踪器参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub iou_match_threshold: f32, // 匹配IOU阈值
    pub confirm_hits: u32,        // 连续命中多少帧转为 Confirmed
    pub max_misses: u32,          // 最大连续丢失帧数
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_match_threshold: 0.3,
            confirm_hits: 3,
            max_misses: 10,
        }
    }
}

/// 火情事件参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub merge_iou_threshold: f32,       // 轨迹并入已有事件的IOU阈值
    pub min_sustained_seconds: f64,     // 持续多久才确认火情
    pub event_idle_timeout_seconds: f64, // 无更新多久视为熄灭
    pub save_dir: Option<PathBuf>,      // 告警快照保存目录
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            merge_iou_threshold: 0.1,
            min_sustained_seconds: 2.0,
            event_idle_timeout_seconds: 10.0,
            save_dir: None,
        }
    }
}

/// 告警投递参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub location_label: String,
    pub min_realert_interval_seconds: f64,
    pub max_alerts_per_minute: u32,
    pub queue_capacity: usize,
    pub enqueue_timeout_ms: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ratio: f64,
    pub drain_timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            location_label: "Drone surveillance area".to_string(),
            min_realert_interval_seconds: 60.0,
            max_alerts_per_minute: 20,
            queue_capacity: 64,
            enqueue_timeout_ms: 200,
            concurrency: 1,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            drain_timeout_ms: 5_000,
        }
    }
}

impl NotifierConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Telegram Bot 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl TelegramConfig {
    /// 启用且凭证齐全
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self = serde_json::from_str(&json)?;
                tracing::info!(path = %path.display(), "✅ 配置已加载");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "💾 配置已保存");
        Ok(())
    }

    /// 环境变量覆盖 Telegram 凭证 (TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID)
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            std::env::var("TELEGRAM_CHAT_ID").ok(),
        );
    }

    fn apply_overrides(&mut self, token: Option<String>, chat_id: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = chat_id.filter(|c| !c.is_empty()) {
            self.telegram.chat_id = chat_id;
        }
    }

    /// 参数范围检查
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(name: &str, v: f32) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {v}")))
            }
        }
        fn positive(name: &str, ok: bool) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be positive")))
            }
        }

        unit("detector.min_confidence", self.detector.min_confidence)?;
        unit("tracker.iou_match_threshold", self.tracker.iou_match_threshold)?;
        unit("event.merge_iou_threshold", self.event.merge_iou_threshold)?;
        positive("tracker.confirm_hits", self.tracker.confirm_hits > 0)?;
        positive(
            "event.min_sustained_seconds",
            self.event.min_sustained_seconds >= 0.0,
        )?;
        positive(
            "event.event_idle_timeout_seconds",
            self.event.event_idle_timeout_seconds > 0.0,
        )?;

        let n = &self.notifier;
        positive("notifier.max_alerts_per_minute", n.max_alerts_per_minute > 0)?;
        positive("notifier.queue_capacity", n.queue_capacity > 0)?;
        positive("notifier.concurrency", n.concurrency > 0)?;
        positive("notifier.backoff_multiplier", n.backoff_multiplier >= 1.0)?;
        if !(0.0..=1.0).contains(&n.jitter_ratio) {
            return Err(ConfigError::Invalid(format!(
                "notifier.jitter_ratio must be in [0, 1], got {}",
                n.jitter_ratio
            )));
        }
        if self.detector.fire_labels.is_empty() {
            return Err(ConfigError::Invalid("detector.fire_labels is empty".into()));
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        tracing::info!(
            iou = self.tracker.iou_match_threshold,
            confirm_hits = self.tracker.confirm_hits,
            max_misses = self.tracker.max_misses,
            "🎛️  跟踪器配置"
        );
        tracing::info!(
            merge_iou = self.event.merge_iou_threshold,
            min_sustained_s = self.event.min_sustained_seconds,
            idle_timeout_s = self.event.event_idle_timeout_seconds,
            "🔥 事件配置"
        );
        tracing::info!(
            per_minute = self.notifier.max_alerts_per_minute,
            queue = self.notifier.queue_capacity,
            retries = self.notifier.max_retries,
            telegram = self.telegram.is_usable(),
            "📨 告警配置"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");

        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config, SentinelConfig::default());
        assert!(path.exists());

        // 再次加载得到相同配置
        assert_eq!(SentinelConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{"tracker":{"confirm_hits":5},"event":{"save_dir":"out"}}"#).unwrap();

        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config.tracker.confirm_hits, 5);
        assert_eq!(config.tracker.max_misses, 10);
        assert_eq!(config.event.save_dir, Some(PathBuf::from("out")));
        assert_eq!(config.notifier, NotifierConfig::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SentinelConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = SentinelConfig::default();
        assert!(config.validate().is_ok());

        config.tracker.iou_match_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = SentinelConfig::default();
        config.notifier.max_alerts_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_fill_telegram_credentials() {
        let mut config = SentinelConfig::default();
        config.telegram.enabled = true;
        assert!(!config.telegram.is_usable());

        config.apply_overrides(Some("123:abc".into()), Some("-100".into()));
        assert!(config.telegram.is_usable());

        // 空值不覆盖
        config.apply_overrides(Some(String::new()), None);
        assert_eq!(config.telegram.bot_token, "123:abc");
    }
}
