/// FFmpeg 帧源 (RTSP 拉流 / 视频文件)
/// FFmpeg frame source: 独立解码线程 + 有界通道交接
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbaImage;
use tracing::{error, info, warn};

use super::decode_filter::DecodeFilter;
use super::FrameSource;
use crate::error::{Result, SentinelError};

/// 等待下一帧的最长时间, 超时视为流中断
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// 网络 I/O 超时 (微秒): 阻塞在读取上的会话据此退出
const IO_TIMEOUT_US: &str = "5000000";

/// 同时存活的解码会话上限 (当前会话 + 一个正在退出的旧会话)
const MAX_SESSIONS: usize = 2;

pub struct FfmpegSource {
    url: String,
    width: u32,
    height: u32,
    generation: Arc<AtomicUsize>,
    sessions: Arc<AtomicUsize>,
    rx: Receiver<RgbaImage>,
}

impl FfmpegSource {
    /// 打开视频源, 解码输出统一缩放到 `width` × `height`
    pub fn open(url: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        let url = url.into();
        let generation = Arc::new(AtomicUsize::new(0));
        let sessions = Arc::new(AtomicUsize::new(0));
        let rx = spawn_decoder(
            &url,
            width,
            height,
            Arc::clone(&generation),
            SessionGuard::acquire(&sessions)?,
        )?;
        Ok(Self {
            url,
            width,
            height,
            generation,
            sessions,
            rx,
        })
    }
}

/// 存活解码会话计数, 解码线程退出时释放
struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn acquire(sessions: &Arc<AtomicUsize>) -> Result<Self> {
        let acquired = sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_SESSIONS).then_some(n + 1)
            })
            .is_ok();
        if !acquired {
            return Err(SentinelError::Source("旧解码会话尚未退出".into()));
        }
        Ok(Self(Arc::clone(sessions)))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 输入参数: 网络流都带 I/O 超时
fn input_opts(url: &str) -> Vec<(&'static str, &'static str)> {
    if url.starts_with("rtsp://") {
        vec![
            ("rtsp_transport", "tcp"),
            ("buffer_size", "67108864"),
            ("rtsp_flags", "prefer_tcp"),
            ("timeout", IO_TIMEOUT_US),
        ]
    } else if url.contains("://") {
        vec![("rw_timeout", IO_TIMEOUT_US)]
    } else {
        Vec::new()
    }
}

/// 启动一个解码会话, 代数为当前值
fn spawn_decoder(
    url: &str,
    width: u32,
    height: u32,
    generation: Arc<AtomicUsize>,
    guard: SessionGuard,
) -> Result<Receiver<RgbaImage>> {
    let (tx, rx) = bounded(2);
    let current = generation.load(Ordering::Relaxed);
    let filter = DecodeFilter::new(current, generation, tx);
    let url = url.to_string();

    thread::Builder::new()
        .name(format!("decode-{current}"))
        .spawn(move || {
            let _guard = guard;
            info!(url = %url, generation = current, "解码器启动");
            if let Err(e) = decode(&url, width, height, filter) {
                error!(url = %url, error = %e, "解码失败");
            }
            info!(url = %url, generation = current, "解码器退出");
        })?;
    Ok(rx)
}

fn decode(url: &str, width: u32, height: u32, filter: DecodeFilter) -> Result<()> {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let mut input = Input::new(url);
    let opts = input_opts(url);
    if !opts.is_empty() {
        input = input.set_input_opts(opts.into_iter().collect());
    }

    let scale = format!("scale={width}:{height},format=yuv420p");
    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_descs([scale.as_str()].into())
        .output(out)
        .build()
        .map_err(|e| SentinelError::Source(format!("构建失败: {e}")))?;

    let sch = ctx
        .start()
        .map_err(|e| SentinelError::Source(format!("启动失败: {e}")))?;
    sch.wait()
        .map_err(|e| SentinelError::Source(format!("解码中断: {e}")))
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        match self.rx.recv_timeout(FRAME_TIMEOUT) {
            Ok(frame) => Ok(Some(frame)),
            // 解码线程退出: 文件结束或连接断开
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => {
                warn!(url = %self.url, "等待帧超时");
                Err(SentinelError::Source(format!("{} 等待帧超时", self.url)))
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        // 旧会话收到下一帧时发现代数过期, 或 I/O 超时后退出;
        // 会话数已满时不再新建, 由工作线程稍后重试
        let guard = SessionGuard::acquire(&self.sessions)?;
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.rx = spawn_decoder(
            &self.url,
            self.width,
            self.height,
            Arc::clone(&self.generation),
            guard,
        )?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("ffmpeg {}", self.url)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }
}
