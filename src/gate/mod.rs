/// 门线系统 (Gate System)
///
/// - Gate:            不可变门线定义 (像素坐标 + 内侧方向 + 启用时段)
/// - GateSet:         单个摄像头的门线快照, 重载时整体替换
/// - GateConfigStore: 从存储协作方解析门线快照
pub mod store;

pub use store::GateConfigStore;

use chrono::NaiveTime;
use serde::Serialize;

use crate::error::{Result, SentinelError};
use crate::geometry::Point;

pub type CameraId = i64;
pub type GateId = i64;

/// 内侧方向: 哪个几何跨越方向代表 "进入"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InboundDirection {
    /// A→B 为进入
    AToBInward,
    /// B→A 为进入
    BToAInward,
}

impl InboundDirection {
    /// 宽松解析数据库中的方向字段, 无法识别时返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<f64>() {
            return match value {
                v if v > 0.0 => Some(Self::AToBInward),
                v if v < 0.0 => Some(Self::BToAInward),
                _ => None,
            };
        }

        let letters: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match letters.as_str() {
            "ATOB" | "AB" => Some(Self::AToBInward),
            "BTOA" | "BA" => Some(Self::BToAInward),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AToBInward => "A->B",
            Self::BToAInward => "B->A",
        }
    }
}

impl Default for InboundDirection {
    fn default() -> Self {
        Self::AToBInward
    }
}

/// 启用时段 [start, end), start > end 表示跨午夜, start == end 表示全天
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl ActiveWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn full_day() -> Self {
        Self::new(NaiveTime::MIN, NaiveTime::MIN)
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn is_full_day(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= t && t < self.end
        } else if self.start > self.end {
            // 跨日区间
            t >= self.start || t < self.end
        } else {
            true
        }
    }
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self::full_day()
    }
}

/// 门线定义 (构造后不可变)
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    id: GateId,
    camera_id: CameraId,
    name: String,
    a: Point,
    b: Point,
    inbound: InboundDirection,
    window: ActiveWindow,
}

impl Gate {
    pub fn new(
        id: GateId,
        camera_id: CameraId,
        name: impl Into<String>,
        a: Point,
        b: Point,
        inbound: InboundDirection,
        window: ActiveWindow,
    ) -> Result<Self> {
        if !(a.x.is_finite() && a.y.is_finite() && b.x.is_finite() && b.y.is_finite()) {
            return Err(SentinelError::invalid_gate(id, "端点坐标不是有限值"));
        }
        if a == b {
            return Err(SentinelError::invalid_gate(id, "端点 A 与 B 重合"));
        }
        Ok(Self {
            id,
            camera_id,
            name: name.into(),
            a,
            b,
            inbound,
            window,
        })
    }

    pub fn id(&self) -> GateId {
        self.id
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn a(&self) -> Point {
        self.a
    }

    pub fn b(&self) -> Point {
        self.b
    }

    pub fn inbound(&self) -> InboundDirection {
        self.inbound
    }

    pub fn window(&self) -> ActiveWindow {
        self.window
    }

    /// 几何与方向是否相同 (名称与时段变化不影响跟踪状态)
    pub fn same_geometry(&self, other: &Gate) -> bool {
        self.a == other.a && self.b == other.b && self.inbound == other.inbound
    }
}

/// 摄像头门线快照
#[derive(Debug, Clone, Default)]
pub struct GateSet {
    camera_id: CameraId,
    generation: u64,
    gates: Vec<Gate>,
}

impl GateSet {
    pub fn new(camera_id: CameraId, generation: u64, gates: Vec<Gate>) -> Self {
        Self {
            camera_id,
            generation,
            gates,
        }
    }

    pub fn empty(camera_id: CameraId) -> Self {
        Self::new(camera_id, 0, Vec::new())
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn get(&self, gate_id: GateId) -> Option<&Gate> {
        self.gates.iter().find(|g| g.id == gate_id)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
