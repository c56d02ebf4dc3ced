// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 告警快照: 峰值帧 + 本帧全部火点框 → JPEG

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::error::{ParameterError, ParameterErrorKind};
use image::{ImageError, ImageFormat, Rgb, RgbImage};

use crate::detection::types::{BBox, FrameId};
use crate::events::EventId;

use super::source::FrameImage;

const PEAK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const DETECTION_COLOR: Rgb<u8> = Rgb([255, 160, 0]);
const BOX_THICKNESS: u32 = 3;

/// 在帧上画出本帧检测框 (橙) 与峰值火点框 (红) 并编码为 JPEG
pub fn encode_snapshot(image: &FrameImage, peak: &BBox, detections: &[BBox]) -> Result<Vec<u8>, ImageError> {
    let mut img = RgbImage::from_raw(image.width, image.height, image.rgb_data.as_ref().clone())
        .ok_or_else(|| {
            ImageError::Parameter(ParameterError::from_kind(ParameterErrorKind::DimensionMismatch))
        })?;

    for bbox in detections.iter().filter(|b| *b != peak) {
        draw_box(&mut img, bbox, DETECTION_COLOR);
    }
    draw_box(&mut img, peak, PEAK_COLOR);

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

/// 空心矩形 (超出画面部分裁剪)
fn draw_box(img: &mut RgbImage, bbox: &BBox, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
    let (x1, y1) = (clamp(bbox.x1, w), clamp(bbox.y1, h));
    let (x2, y2) = (clamp(bbox.x2, w), clamp(bbox.y2, h));

    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            for y in [y1.saturating_add(t).min(y2), y2.saturating_sub(t).max(y1)] {
                img.put_pixel(x, y, color);
            }
        }
        for y in y1..=y2 {
            for x in [x1.saturating_add(t).min(x2), x2.saturating_sub(t).max(x1)] {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// 存档文件名: fire_alert_event{id}_frame{frame}.jpg
pub fn archive_path(dir: &Path, event_id: EventId, frame_id: FrameId) -> PathBuf {
    dir.join(format!("fire_alert_event{event_id}_frame{frame_id}.jpg"))
}

/// 写入告警快照存档
pub fn archive(dir: &Path, event_id: EventId, frame_id: FrameId, jpeg: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = archive_path(dir, event_id, frame_id);
    std::fs::write(&path, jpeg)?;
    Ok(path)
}
