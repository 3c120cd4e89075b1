// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 哨兵配置参数
pub mod detection; // 跟踪结果与跟踪器接口
pub mod engine; // 越线判定引擎
pub mod error;
pub mod gate; // 门线定义与解析
pub mod geometry;
pub mod input; // 视频输入系统
pub mod logging;
pub mod manager; // 工作线程管理
pub mod render; // 帧标注
pub mod sink; // 事件落库
pub mod storage; // 存储协作方
pub mod stream; // 推流帧缓冲
pub mod worker; // 摄像头工作线程

pub use crate::config::{EngineConfig, SentinelConfig, SinkConfig, WorkerConfig};
pub use crate::engine::{
    AlertLevel, CrossingDirection, CrossingEvent, EventKind, FrameClock, GateEngine,
};
pub use crate::error::{Result, SentinelError};
pub use crate::gate::{CameraId, Gate, GateConfigStore, GateId, GateSet, InboundDirection};
pub use crate::manager::{CollaboratorFactory, DefaultCollaborators, Manager, WorkerStatus};
pub use crate::sink::{EventSink, StorageSink};
pub use crate::storage::{SqliteStorage, Storage};
pub use crate::stream::{AnnotatedFrame, FrameBuffer};
pub use crate::worker::{CameraWorker, ControllableWorker, WorkerContext};

/// 当前本地时间字符串 (文件名 / 快照命名)
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}
