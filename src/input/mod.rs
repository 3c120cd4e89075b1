/// 视频输入系统 (Video Input System)
///
/// 工作线程通过 FrameSource 拉取 RGBA 帧
/// - ImageSequenceSource: 图片目录回放 (离线调试 / 测试)
/// - FfmpegSource:        RTSP / 文件解码 (需要 `ffmpeg` 特性)
/// - FrameResizer:        统一缩放到参考分辨率
/// - DeferredSource:      打不开的视频源, 回绕时重试打开
pub mod deferred;
pub mod resize;
pub mod sequence;

#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;

pub use deferred::{DeferredSource, SourceOpener};
pub use resize::FrameResizer;
pub use sequence::ImageSequenceSource;

#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegSource;

use image::RgbaImage;

use crate::error::Result;

/// 帧来源
pub trait FrameSource: Send {
    /// 下一帧; `Ok(None)` 表示流结束
    fn next_frame(&mut self) -> Result<Option<RgbaImage>>;

    /// 回到开头 (文件) 或重新连接 (网络流)
    fn rewind(&mut self) -> Result<()>;

    /// 用于日志的描述
    fn describe(&self) -> String {
        String::from("frame source")
    }
}
