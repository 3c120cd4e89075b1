//! 跟踪协作方 (Tracker collaborator)
//!
//! 实际的检测 + 跟踪推理在系统外部完成, 这里只定义接口以及
//! 两个可离线运行的实现:
//! - ReplayTracker: 回放 JSON Lines 格式的跟踪记录
//! - NullTracker:   永远返回空列表

use std::fs;
use std::path::Path;

use image::RgbaImage;
use serde::Deserialize;
use tracing::{debug, info};

use super::types::{BBox, Detection, PoseKeypoints, TrackId};
use crate::error::{Result, SentinelError};
use crate::geometry::Point;

/// 跟踪器统一接口
pub trait Tracker: Send {
    /// 处理一帧, 返回当前帧的跟踪目标
    fn update(&mut self, frame: &RgbaImage) -> Result<Vec<Detection>>;

    /// 重置跟踪器 (清除所有跟踪, 视频源回绕时调用)
    fn reset(&mut self);
}

/// 单个目标的回放记录
#[derive(Debug, Clone, Deserialize)]
struct ReplayDetection {
    track_id: TrackId,
    bbox: [f32; 4], // x1, y1, x2, y2
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    keypoints: Option<Vec<[f32; 3]>>,
    #[serde(default)]
    anchor: Option<[f32; 2]>,
}

fn default_confidence() -> f32 {
    1.0
}

/// 一行 = 一帧
#[derive(Debug, Clone, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    detections: Vec<ReplayDetection>,
}

/// 回放跟踪器: 按帧依次输出记录, 到末尾后循环
pub struct ReplayTracker {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ReplayTracker {
    pub fn from_file(path: impl AsRef<Path>, use_keypoints: bool) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let tracker = Self::parse(&text, use_keypoints)?;
        info!(path = %path.display(), frames = tracker.frames.len(), "跟踪回放已加载");
        Ok(tracker)
    }

    /// 解析 JSON Lines 文本, 空行忽略
    pub fn parse(text: &str, use_keypoints: bool) -> Result<Self> {
        let frames = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(no, line)| {
                let frame: ReplayFrame = serde_json::from_str(line)
                    .map_err(|e| SentinelError::Tracker(format!("第 {} 行: {e}", no + 1)))?;
                Ok(frame
                    .detections
                    .into_iter()
                    .map(|d| d.into_detection(use_keypoints))
                    .collect())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl ReplayDetection {
    fn into_detection(self, use_keypoints: bool) -> Detection {
        let [x1, y1, x2, y2] = self.bbox;
        let bbox = BBox {
            x1,
            y1,
            x2,
            y2,
            confidence: self.confidence,
            class_id: 0,
        };
        let keypoints = self.keypoints.map(|points| PoseKeypoints {
            points: points.into_iter().map(|[x, y, c]| (x, y, c)).collect(),
        });
        let detection = Detection::new(self.track_id, bbox, keypoints, use_keypoints);
        match self.anchor {
            Some([x, y]) => detection.with_anchor(Point::new(x, y)),
            None => detection,
        }
    }
}

impl Tracker for ReplayTracker {
    fn update(&mut self, _frame: &RgbaImage) -> Result<Vec<Detection>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        if self.cursor >= self.frames.len() {
            debug!("跟踪回放循环");
            self.cursor = 0;
        }
        let detections = self.frames[self.cursor].clone();
        self.cursor += 1;
        Ok(detections)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// 无检测 (未配置跟踪器的摄像头仍然推流)
#[derive(Debug, Default)]
pub struct NullTracker;

impl Tracker for NullTracker {
    fn update(&mut self, _frame: &RgbaImage) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}

/// 根据跟踪ID生成颜色 (使用HSV色彩空间)
pub fn id_to_color(id: TrackId) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
