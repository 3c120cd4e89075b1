//! 越线事件 (Crossing events)

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::detection::types::TrackId;
use crate::gate::{CameraId, GateId};

/// 事件时间戳在存储与日志中的文本格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// 按内侧方向进入
    Entry,
    /// 反方向离开
    Exit,
    /// 反方向闯入
    Invasion,
    /// 未启用方向分类时的普通越线
    GenericCross,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Invasion => "invasion",
            Self::GenericCross => "generic_cross",
        }
    }
}

/// 与内侧方向相反的越线在配置中的标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpposingKind {
    Exit,
    Invasion,
}

impl From<OpposingKind> for EventKind {
    fn from(kind: OpposingKind) -> Self {
        match kind {
            OpposingKind::Exit => EventKind::Exit,
            OpposingKind::Invasion => EventKind::Invasion,
        }
    }
}

/// 告警级别: 启用时段内为 Heavy, 时段外为 Light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Heavy,
    Light,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heavy => "heavy",
            Self::Light => "light",
        }
    }
}

/// 几何跨越方向 (-1 → +1 为 A→B)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingDirection {
    AToB,
    BToA,
}

impl CrossingDirection {
    /// 由前后两次的判边结果得到方向, 同侧或未观测时返回 None
    pub fn from_sides(previous: i8, current: i8) -> Option<Self> {
        match (previous, current) {
            (-1, 1) => Some(Self::AToB),
            (1, -1) => Some(Self::BToA),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AToB => "A->B",
            Self::BToA => "B->A",
        }
    }
}

/// 越线事件 (一经生成不再修改)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossingEvent {
    pub camera_id: CameraId,
    pub gate_id: GateId,
    pub gate_name: String,
    pub track_id: TrackId,
    pub kind: EventKind,
    pub direction: CrossingDirection,
    pub alert: AlertLevel,
    pub timestamp: NaiveDateTime,
}
