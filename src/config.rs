//! 哨兵配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::OpposingKind;
use crate::error::{Result, SentinelError};

/// 越线判定参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cooldown_ms: u64,         // 同一 (门线, 目标) 两次事件的最小间隔
    pub near_line_px: f32,        // 锚点到线段的最大距离
    pub min_normal_move_px: f32,  // 法向最小位移 (抖动抑制)
    pub flash_ms: u64,            // 事件后门线高亮时长
    pub idle_evict_ms: u64,       // 跟踪状态闲置回收时长
    pub use_keypoints: bool,      // 优先使用脚踝关键点作为锚点
    pub classify_direction: bool, // 关闭时所有越线为 generic_cross
    pub opposing_kind: OpposingKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 500,
            near_line_px: 30.0,
            min_normal_move_px: 1.0,
            flash_ms: 1500,
            idle_evict_ms: 30_000,
            use_keypoints: true,
            classify_direction: true,
            opposing_kind: OpposingKind::Invasion,
        }
    }
}

impl EngineConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn flash_duration(&self) -> Duration {
        Duration::from_millis(self.flash_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_evict_ms)
    }
}

/// 摄像头工作线程参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub retry_delay_ms: u64, // 取帧失败后的重试间隔
    pub playback_fps: u32,   // 图片序列回放帧率, 0 为不限速
    pub annotate: bool,      // 是否绘制标注
    pub jpeg_quality: u8,    // 推流 JPEG 质量
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 200,
            playback_fps: 0,
            annotate: true,
            jpeg_quality: 80,
        }
    }
}

impl WorkerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// 事件落库参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub queue_capacity: usize, // 事件队列容量, 满时丢弃
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    // === 参考分辨率 (门线坐标与检测共用的像素空间) ===
    pub reference_width: u32,
    pub reference_height: u32,

    // === 运行环境 ===
    pub log_level: String,
    pub font_path: Option<PathBuf>,
    pub replay_dir: Option<PathBuf>, // 跟踪回放文件目录: <camera_id>.jsonl

    pub engine: EngineConfig,
    pub worker: WorkerConfig,
    pub sink: SinkConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            reference_width: 1280,
            reference_height: 720,
            log_level: "info".to_string(),
            font_path: None,
            replay_dir: None,
            engine: EngineConfig::default(),
            worker: WorkerConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "配置文件不存在, 创建默认配置");
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| SentinelError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        info!(path = %path.display(), "配置已加载");
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "配置已保存");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.reference_width == 0 || self.reference_height == 0 {
            return Err(SentinelError::Config("参考分辨率不能为 0".into()));
        }
        let e = &self.engine;
        for (name, value) in [
            ("near_line_px", e.near_line_px),
            ("min_normal_move_px", e.min_normal_move_px),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SentinelError::Config(format!("{name} 必须为非负数: {value}")));
            }
        }
        if self.sink.queue_capacity == 0 {
            return Err(SentinelError::Config("事件队列容量不能为 0".into()));
        }
        if !(1..=100).contains(&self.worker.jpeg_quality) {
            warn!(quality = self.worker.jpeg_quality, "JPEG 质量超出 1-100, 编码时将截断");
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        let e = &self.engine;
        info!(
            width = self.reference_width,
            height = self.reference_height,
            "参考分辨率"
        );
        info!(
            cooldown_ms = e.cooldown_ms,
            near_line_px = e.near_line_px,
            min_normal_move_px = e.min_normal_move_px,
            flash_ms = e.flash_ms,
            idle_evict_ms = e.idle_evict_ms,
            "越线判定参数"
        );
        info!(
            use_keypoints = e.use_keypoints,
            classify_direction = e.classify_direction,
            opposing = ?e.opposing_kind,
            "方向分类"
        );
        info!(
            retry_delay_ms = self.worker.retry_delay_ms,
            playback_fps = self.worker.playback_fps,
            queue_capacity = self.sink.queue_capacity,
            "工作线程"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/sentinel.json");
        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config, SentinelConfig::default());
        assert!(path.exists());
        assert_eq!(SentinelConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(
            &path,
            r#"{"reference_width": 1920, "engine": {"cooldown_ms": 800, "opposing_kind": "exit"}}"#,
        )
        .unwrap();
        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config.reference_width, 1920);
        assert_eq!(config.reference_height, 720);
        assert_eq!(config.engine.cooldown(), Duration::from_millis(800));
        assert_eq!(config.engine.opposing_kind, OpposingKind::Exit);
        assert_eq!(config.engine.near_line_px, 30.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SentinelConfig::load(&path), Err(SentinelError::Config(_))));

        let mut config = SentinelConfig::default();
        config.reference_height = 0;
        assert!(config.validate().is_err());

        let mut config = SentinelConfig::default();
        config.engine.near_line_px = -1.0;
        assert!(config.validate().is_err());
    }
}
