/// FFmpeg解码过滤器模块
/// FFmpeg decode filter: YUV420P 帧 → RGBA 图像 → 工作线程
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbaImage;
use tracing::{debug, info, warn};

/// 解码过滤器: 每个解码会话持有一个代数ID, 代数过期后主动终止解码
pub struct DecodeFilter {
    generation: usize,
    active_generation: Arc<AtomicUsize>,
    tx: Sender<RgbaImage>,
    count: usize,
    last: Instant,
    dropped_frames: usize,
    total_frames: usize,
}

impl DecodeFilter {
    pub fn new(generation: usize, active_generation: Arc<AtomicUsize>, tx: Sender<RgbaImage>) -> Self {
        Self {
            generation,
            active_generation,
            tx,
            count: 0,
            last: Instant::now(),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: &str) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!(frame = self.total_frames, reason, "丢弃帧");
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!(generation = self.generation, "解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 检查解码器代数ID,如果已过期则停止解码
        let current = self.active_generation.load(Ordering::Relaxed);
        if self.generation != current {
            debug!(generation = self.generation, current, "解码器已过期, 停止解码");
            return Err("Decoder expired".to_string());
        }

        self.total_frames += 1;

        // SAFETY: 帧指针在 filter_frame 调用期间有效, 只读访问
        let image = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame("空帧/损坏帧");
                return Ok(None);
            }

            let raw = &*frame.as_ptr();
            let (w, h) = (raw.width as u32, raw.height as u32);
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                self.drop_frame("非法分辨率");
                return Ok(None);
            }

            // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
            if raw.decode_error_flags & 0x03 != 0 {
                self.drop_frame("解码错误标志");
                return Ok(None);
            }

            let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.drop_frame("YUV指针为空");
                return Ok(None);
            }
            if y_stride < w as usize || uv_stride < (w as usize / 2) {
                self.drop_frame("步长异常");
                return Ok(None);
            }

            let mut buffer = vec![255u8; (w * h) as usize * 4];
            yuv420p_to_rgba(
                y_plane,
                u_plane,
                v_plane,
                y_stride,
                uv_stride,
                &mut buffer,
                w as usize,
                h as usize,
            );
            RgbaImage::from_raw(w, h, buffer)
        };

        let Some(image) = image else {
            self.drop_frame("缓冲区尺寸不匹配");
            return Ok(None);
        };

        self.count += 1;
        match self.tx.try_send(image) {
            Ok(()) => {}
            // 工作线程处理不过来时丢帧, 保证低延迟
            Err(TrySendError::Full(_)) => self.dropped_frames += 1,
            Err(TrySendError::Disconnected(_)) => return Err("Receiver closed".to_string()),
        }

        // 每秒打印一次解码统计
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            debug!(
                fps = %format_args!("{:.1}", self.count as f64 / elapsed),
                total = self.total_frames,
                dropped = self.dropped_frames,
                "解码统计"
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(generation = self.generation, "解码线程退出");
    }
}

/// YUV420P → RGBA (BT.601 定点系数)
#[inline]
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgba(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 4;
        }
    }
}
