//! 延迟打开的帧源
//!
//! 创建时打不开的视频源 (目录未挂载 / 摄像头离线) 仍然注册工作线程,
//! 取帧返回错误, 由工作线程的回绕重试路径在 `rewind` 时重新打开。

use tracing::{debug, info};

use super::FrameSource;
use crate::error::{Result, SentinelError};

/// 重新打开视频源
pub type SourceOpener = Box<dyn FnMut() -> Result<Box<dyn FrameSource>> + Send>;

pub struct DeferredSource {
    label: String,
    opener: SourceOpener,
    inner: Option<Box<dyn FrameSource>>,
    attempts: u64,
}

impl DeferredSource {
    /// 尚未打开的帧源, 第一次 `rewind` 时尝试打开
    pub fn pending(label: impl Into<String>, opener: SourceOpener) -> Self {
        Self {
            label: label.into(),
            opener,
            inner: None,
            attempts: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

impl FrameSource for DeferredSource {
    fn next_frame(&mut self) -> Result<Option<image::RgbaImage>> {
        match self.inner.as_mut() {
            Some(source) => source.next_frame(),
            None => Err(SentinelError::Source(format!("视频源尚未打开: {}", self.label))),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        if let Some(source) = self.inner.as_mut() {
            return source.rewind();
        }

        self.attempts += 1;
        match (self.opener)() {
            Ok(source) => {
                info!(source = %self.label, attempts = self.attempts, "视频源已打开");
                self.inner = Some(source);
                Ok(())
            }
            Err(e) => {
                debug!(source = %self.label, attempts = self.attempts, error = %e, "视频源仍无法打开");
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        match &self.inner {
            Some(source) => source.describe(),
            None => format!("{} (等待打开)", self.label),
        }
    }
}
