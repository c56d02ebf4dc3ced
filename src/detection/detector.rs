// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测器接口 (Detector)
//! 职责: 帧 → 原始检测框; 边界校验 + 类别/置信度过滤后交给跟踪器

use crate::config::DetectorConfig;
use crate::error::{InferenceError, InvalidDetection};
use crate::pipeline::source::Frame;

use super::types::{Detection, RawDetection};

/// 外部检测器 (模型推理细节不在本库范围内)
pub trait Detector {
    fn name(&self) -> &str;

    /// 推理失败时该帧按零检测处理
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError>;
}

/// 回放检测器: 直接返回帧上携带的预计算检测结果
#[derive(Debug, Default)]
pub struct ReplayDetector;

impl Detector for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, InferenceError> {
        Ok(frame.annotations.clone())
    }
}

/// 单帧过滤结果
#[derive(Debug, Default)]
pub struct FilteredDetections {
    pub accepted: Vec<Detection>,
    pub rejected: Vec<InvalidDetection>,
    /// 类别不符或置信度过低
    pub ignored: usize,
}

/// 边界校验 + 火焰类别过滤
pub struct DetectionFilter {
    fire_labels: Vec<String>,
    min_confidence: f32,
}

impl DetectionFilter {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            fire_labels: config
                .fire_labels
                .iter()
                .map(|l| l.to_lowercase())
                .collect(),
            min_confidence: config.min_confidence,
        }
    }

    pub fn apply(&self, raw: Vec<RawDetection>) -> FilteredDetections {
        let mut out = FilteredDetections::default();
        for r in raw {
            match Detection::try_from(r) {
                Ok(det) => {
                    let label = det.label.to_lowercase();
                    if !self.fire_labels.contains(&label) || det.confidence < self.min_confidence {
                        out.ignored += 1;
                    } else {
                        out.accepted.push(det);
                    }
                }
                Err(e) => out.rejected.push(e),
            }
        }
        out
    }
}
