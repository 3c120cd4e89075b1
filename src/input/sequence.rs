//! 图片序列帧源
//!
//! 目录下的静态图片按文件名排序依次输出, 可按固定帧率限速。

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::{debug, info};

use super::FrameSource;
use crate::error::{Result, SentinelError};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl ImageSequenceSource {
    /// 目录 → 排序后的图片序列; 单个文件视为只有一帧的序列
    pub fn open(path: impl AsRef<Path>, playback_fps: u32) -> Result<Self> {
        let path = path.as_ref();
        let paths = if path.is_dir() {
            let mut paths: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(SentinelError::Source(format!("路径不存在: {}", path.display())));
        };

        info!(path = %path.display(), frames = paths.len(), "图片序列已打开");
        Ok(Self::from_paths(paths, playback_fps))
    }

    pub fn from_paths(paths: Vec<PathBuf>, playback_fps: u32) -> Self {
        let frame_interval =
            (playback_fps > 0).then(|| Duration::from_secs_f64(1.0 / playback_fps as f64));
        Self {
            paths,
            cursor: 0,
            frame_interval,
            last_frame: None,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let frame = image::open(path)?.to_rgba8();
        self.pace();
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<()> {
        debug!(frames = self.paths.len(), "图片序列回到开头");
        self.cursor = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("image sequence ({} frames)", self.paths.len())
    }
}
