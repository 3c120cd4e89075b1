/// 跟踪结果数据结构定义
/// Data structures produced by the tracking collaborator
use serde::{Deserialize, Serialize};

use crate::geometry::Point;

// ========== 公共常量 ==========

/// COCO 17 关键点中的左右脚踝
pub const LEFT_ANKLE: usize = 15;
pub const RIGHT_ANKLE: usize = 16;

pub type TrackId = u32;

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 底边中点 (近似脚底位置)
    pub fn bottom_center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, self.y2)
    }
}

/// 姿态关键点 (Pose keypoints)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseKeypoints {
    pub points: Vec<(f32, f32, f32)>, // (x, y, confidence)
}

impl PoseKeypoints {
    /// 两个脚踝的中点, 任一脚踝缺失 (x <= 0) 时返回 None
    pub fn ankle_midpoint(&self) -> Option<Point> {
        let left = self.points.get(LEFT_ANKLE)?;
        let right = self.points.get(RIGHT_ANKLE)?;
        if left.0 <= 0.0 || right.0 <= 0.0 {
            return None;
        }
        Some(Point::new((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0))
    }
}

/// 单个跟踪目标 (一帧)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub track_id: TrackId,
    pub bbox: BBox,
    pub keypoints: Option<PoseKeypoints>,
    /// 用于判边的地面接触点
    pub anchor: Point,
}

impl Detection {
    /// `use_keypoints` 为真且脚踝可用时锚点取脚踝中点, 否则取检测框底边中点
    pub fn new(
        track_id: TrackId,
        bbox: BBox,
        keypoints: Option<PoseKeypoints>,
        use_keypoints: bool,
    ) -> Self {
        let anchor = keypoints
            .as_ref()
            .filter(|_| use_keypoints)
            .and_then(PoseKeypoints::ankle_midpoint)
            .unwrap_or_else(|| bbox.bottom_center());
        Self {
            track_id,
            bbox,
            keypoints,
            anchor,
        }
    }

    pub fn with_anchor(mut self, anchor: Point) -> Self {
        self.anchor = anchor;
        self
    }
}
