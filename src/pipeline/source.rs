// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧来源 (Frame Source)
//!
//! `next_frame()` 返回 None 表示流结束。
//! `ReplaySource` 读取 JSON Lines 格式的预计算检测结果, 每行一帧:
//! `{"frame_id": 1, "timestamp": 0.5, "detections": [{"bbox": [x1,y1,x2,y2], "confidence": 0.9, "class_label": "fire"}]}`

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::detection::types::{FrameId, RawDetection};

/// RGB 像素数据
#[derive(Clone, Debug, PartialEq)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub rgb_data: Arc<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub id: FrameId,
    /// 秒, 单调不减
    pub timestamp: f64,
    pub image: Option<FrameImage>,
    /// 回放时携带的检测结果
    pub annotations: Vec<RawDetection>,
}

impl Frame {
    pub fn new(id: FrameId, timestamp: f64) -> Self {
        Self {
            id,
            timestamp,
            image: None,
            annotations: Vec::new(),
        }
    }

    pub fn with_detections(mut self, detections: Vec<RawDetection>) -> Self {
        self.annotations = detections;
        self
    }

    pub fn with_image(mut self, image: FrameImage) -> Self {
        self.image = Some(image);
        self
    }
}

pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;
}

impl<I: Iterator<Item = Frame>> FrameSource for I {
    fn next_frame(&mut self) -> Option<Frame> {
        self.next()
    }
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    frame_id: Option<FrameId>,
    timestamp: f64,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// JSON Lines 回放源
pub struct ReplaySource<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
    next_id: FrameId,
    last_timestamp: Option<f64>,
    skipped: usize,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        tracing::info!(path = %path.display(), "📂 打开回放文件");
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            next_id: 1,
            last_timestamp: None,
            skipped: 0,
        }
    }

    /// 被跳过的行数 (格式错误或时间戳回退)
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn parse(&mut self, text: &str) -> Option<Frame> {
        let line: ReplayLine = match serde_json::from_str(text) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(line = self.line_no, error = %e, "⚠️  回放行解析失败, 跳过");
                return None;
            }
        };

        if !line.timestamp.is_finite() || self.last_timestamp.is_some_and(|t| line.timestamp < t) {
            tracing::warn!(
                line = self.line_no,
                timestamp = line.timestamp,
                "⚠️  时间戳非单调, 跳过"
            );
            return None;
        }

        let id = line.frame_id.unwrap_or(self.next_id);
        self.next_id = id + 1;
        self.last_timestamp = Some(line.timestamp);
        Some(Frame::new(id, line.timestamp).with_detections(line.detections))
    }
}

impl<R: BufRead> FrameSource for ReplaySource<R> {
    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let text = match self.lines.next()? {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "❌ 回放文件读取失败");
                    return None;
                }
            };
            self.line_no += 1;
            if text.trim().is_empty() {
                continue;
            }
            match self.parse(&text) {
                Some(frame) => return Some(frame),
                None => self.skipped += 1,
            }
        }
    }
}
