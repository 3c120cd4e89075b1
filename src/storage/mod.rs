/// 存储协作方 (Storage collaborator)
///
/// 核心只依赖 `Storage` trait:
/// - 枚举摄像头
/// - 读取摄像头的门线记录 (原始字段, 由 GateConfigStore 解析)
/// - 写入越线事件
pub mod sqlite;

pub use sqlite::SqliteStorage;

use serde::Serialize;

use crate::engine::CrossingEvent;
use crate::error::Result;
use crate::gate::{CameraId, GateId};

/// 摄像头记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRecord {
    pub camera_id: CameraId,
    pub name: String,
    /// 视频源地址 (RTSP / 文件 / 图片目录)
    pub url: String,
}

/// 门线原始记录
///
/// `polygon_json` 为归一化坐标 `{"A": [x, y], "B": [x, y]}`,
/// 时段字段为 `HH:MM[:SS]` 文本, 未配置时为 None。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GateRecord {
    pub gate_id: GateId,
    pub camera_id: CameraId,
    pub name: String,
    pub direction: Option<String>,
    pub polygon_json: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// 已保存的事件 (历史查询)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    pub event_id: i64,
    pub camera_id: CameraId,
    pub gate_id: GateId,
    pub track_id: Option<i64>,
    pub event_type: String,
    pub alert_level: String,
    pub timestamp: String,
}

pub trait Storage: Send + Sync {
    /// 所有已配置的摄像头
    fn list_cameras(&self) -> Result<Vec<CameraRecord>>;

    /// 摄像头下启用进出管控的门线
    fn gate_records(&self, camera_id: CameraId) -> Result<Vec<GateRecord>>;

    /// 写入一条越线事件
    fn insert_event(&self, event: &CrossingEvent) -> Result<()>;

    /// 最近的事件, 按时间倒序
    fn recent_events(&self, limit: usize) -> Result<Vec<StoredEvent>>;
}
