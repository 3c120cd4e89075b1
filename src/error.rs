//! 错误类型 (Error types)

use thiserror::Error;

use crate::gate::{CameraId, GateId};

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("数据库错误: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("图像错误: {0}")]
    Image(#[from] image::ImageError),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("门线 {gate_id} 配置无效: {reason}")]
    InvalidGate { gate_id: GateId, reason: String },

    #[error("视频源错误: {0}")]
    Source(String),

    #[error("跟踪器错误: {0}")]
    Tracker(String),

    #[error("字体加载失败: {0}")]
    Font(String),

    #[error("摄像头 {0} 的工作线程已启动")]
    AlreadyStarted(CameraId),

    #[error("未找到摄像头: {0}")]
    CameraNotFound(CameraId),
}

impl SentinelError {
    pub fn invalid_gate(gate_id: GateId, reason: impl Into<String>) -> Self {
        Self::InvalidGate {
            gate_id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;
