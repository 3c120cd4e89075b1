//! 推流帧缓冲 (FrameBuffer)
//!
//! 每个摄像头只保留最新一帧标注图像, 写入整体替换 `Arc`,
//! 读取方克隆 `Arc` 后离开, 互不阻塞。没有历史帧。

use std::io::Cursor;
use std::sync::Arc;

use chrono::NaiveDateTime;
use crossbeam_skiplist::SkipMap;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};

use crate::error::Result;
use crate::gate::CameraId;

/// multipart 推流的 Content-Type
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 一帧标注结果
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub camera_id: CameraId,
    /// 工作线程内递增的帧序号
    pub seq: u64,
    pub captured_at: NaiveDateTime,
    pub image: RgbaImage,
}

#[derive(Default)]
pub struct FrameBuffer {
    frames: SkipMap<CameraId, Arc<AnnotatedFrame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖该摄像头的最新帧
    pub fn publish(&self, frame: AnnotatedFrame) {
        self.frames.insert(frame.camera_id, Arc::new(frame));
    }

    pub fn latest(&self, camera_id: CameraId) -> Option<Arc<AnnotatedFrame>> {
        self.frames.get(&camera_id).map(|entry| Arc::clone(entry.value()))
    }

    /// 最新帧编码为 JPEG
    pub fn latest_jpeg(&self, camera_id: CameraId, quality: u8) -> Result<Option<Vec<u8>>> {
        self.latest(camera_id)
            .map(|frame| encode_jpeg(&frame.image, quality))
            .transpose()
    }

    pub fn remove(&self, camera_id: CameraId) {
        self.frames.remove(&camera_id);
    }

    pub fn cameras(&self) -> Vec<CameraId> {
        self.frames.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG 不支持 alpha 通道
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

/// multipart/x-mixed-replace 的单个分段
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::Rgba;

    fn frame(camera_id: CameraId, seq: u64) -> AnnotatedFrame {
        AnnotatedFrame {
            camera_id,
            seq,
            captured_at: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            image: RgbaImage::from_pixel(16, 8, Rgba([0, 128, 255, 255])),
        }
    }

    #[test]
    fn publish_overwrites_previous_frame() {
        let buffer = FrameBuffer::new();
        assert!(buffer.latest(1).is_none());

        buffer.publish(frame(1, 1));
        let held = buffer.latest(1).unwrap();
        buffer.publish(frame(1, 2));
        buffer.publish(frame(2, 7));

        // 读者持有的旧帧不受覆盖影响
        assert_eq!(held.seq, 1);
        assert_eq!(buffer.latest(1).unwrap().seq, 2);
        assert_eq!(buffer.cameras(), vec![1, 2]);

        buffer.remove(1);
        assert!(buffer.latest(1).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn latest_jpeg_is_decodable() {
        let buffer = FrameBuffer::new();
        assert!(buffer.latest_jpeg(3, 80).unwrap().is_none());
        buffer.publish(frame(3, 1));
        let jpeg = buffer.latest_jpeg(3, 80).unwrap().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn concurrent_readers_see_whole_frames() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        const FRAMES: u64 = 2000;
        let buffer = FrameBuffer::new();
        let done = AtomicBool::new(false);

        // 每帧所有像素取同一值, 读到混合像素即为不完整帧
        let stamped = |seq: u64| {
            let v = (seq % 251) as u8;
            AnnotatedFrame {
                image: RgbaImage::from_pixel(64, 36, Rgba([v, v, v, 255])),
                ..frame(1, seq)
            }
        };

        thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut last_seq = 0;
                        let mut reads = 0u64;
                        while !done.load(Ordering::Acquire) {
                            let Some(current) = buffer.latest(1) else {
                                continue;
                            };
                            let v = (current.seq % 251) as u8;
                            assert!(current.image.pixels().all(|p| p.0 == [v, v, v, 255]));
                            assert!(current.seq >= last_seq, "帧序号回退");
                            last_seq = current.seq;
                            reads += 1;
                        }
                        reads
                    })
                })
                .collect();

            for seq in 1..=FRAMES {
                buffer.publish(stamped(seq));
            }
            done.store(true, Ordering::Release);

            for reader in readers {
                reader.join().unwrap();
            }
        });

        assert_eq!(buffer.latest(1).unwrap().seq, FRAMES);
    }

    #[test]
    fn mjpeg_part_wraps_payload() {
        let part = mjpeg_part(b"JPEG");
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(b"JPEG\r\n"));
    }
}
