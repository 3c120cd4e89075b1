//! 工作线程管理 (Manager)
//!
//! 注册表由组合根创建并持有, 不使用全局变量。
//! 锁只保护注册表本身; 停止 / 等待线程时先复制出 `Arc` 再操作。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detection::{NullTracker, ReplayTracker, Tracker};
use crate::error::{Result, SentinelError};
use crate::gate::CameraId;
use crate::input::{DeferredSource, FrameSource, ImageSequenceSource};
use crate::storage::{CameraRecord, Storage};
use crate::worker::{CameraWorker, ControllableWorker, WorkerContext};

/// 为每个摄像头创建帧源与跟踪器
pub trait CollaboratorFactory: Send + Sync {
    fn open_source(&self, camera: &CameraRecord) -> Result<Box<dyn FrameSource>>;
    fn open_tracker(&self, camera: &CameraRecord) -> Result<Box<dyn Tracker>>;
}

/// 工作线程状态摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub camera_id: CameraId,
    pub running: bool,
    pub gates: usize,
    pub frames: u64,
    pub events: u64,
}

pub struct Manager {
    storage: Arc<dyn Storage>,
    factory: Arc<dyn CollaboratorFactory>,
    context: WorkerContext,
    workers: Mutex<HashMap<CameraId, Arc<CameraWorker>>>,
}

impl Manager {
    pub fn new(
        storage: Arc<dyn Storage>,
        factory: Arc<dyn CollaboratorFactory>,
        context: WorkerContext,
    ) -> Self {
        Self {
            storage,
            factory,
            context,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// 为存储中的所有摄像头创建工作线程 (不启动), 返回新增数量
    ///
    /// 视频源暂时打不开的摄像头同样注册, 由工作线程重试打开。
    pub fn load_all_cameras(&self) -> Result<usize> {
        let cameras = self.storage.list_cameras()?;
        let mut added = 0;
        for camera in &cameras {
            if self.workers.lock().contains_key(&camera.camera_id) {
                continue;
            }
            match self.add_camera(camera) {
                Ok(_) => added += 1,
                Err(e) => warn!(camera_id = camera.camera_id, error = %e, "摄像头初始化失败"),
            }
        }
        info!(total = cameras.len(), added, "摄像头已加载");
        Ok(added)
    }

    /// 创建并注册工作线程; 已注册时返回现有实例
    pub fn add_camera(&self, camera: &CameraRecord) -> Result<Arc<CameraWorker>> {
        if let Some(existing) = self.get_worker(camera.camera_id) {
            return Ok(existing);
        }

        let source = self.open_source(camera);
        let tracker = self.factory.open_tracker(camera).unwrap_or_else(|e| {
            warn!(camera_id = camera.camera_id, error = %e, "跟踪器创建失败, 使用空跟踪器");
            Box::new(NullTracker) as Box<dyn Tracker>
        });
        let worker = Arc::new(CameraWorker::new(
            camera.camera_id,
            source,
            tracker,
            &self.context,
        ));

        let mut workers = self.workers.lock();
        let worker = workers
            .entry(camera.camera_id)
            .or_insert(worker)
            .clone();
        debug!(camera_id = camera.camera_id, name = %camera.name, "工作线程已注册");
        Ok(worker)
    }

    /// 启动所有尚未启动的工作线程, 返回本次启动数量
    pub fn start_all(&self) -> usize {
        let mut started = 0;
        for worker in self.snapshot() {
            match worker.start() {
                Ok(()) => started += 1,
                Err(SentinelError::AlreadyStarted(_)) => {}
                Err(e) => warn!(camera_id = worker.camera_id(), error = %e, "工作线程启动失败"),
            }
        }
        info!(started, "工作线程已启动");
        started
    }

    pub fn start_worker(&self, camera_id: CameraId) -> Result<()> {
        self.require(camera_id)?.start()
    }

    /// 通知所有工作线程停止 (不等待)
    pub fn stop_all(&self) {
        for worker in self.snapshot() {
            worker.stop();
        }
    }

    /// 等待所有工作线程退出
    pub fn join_all(&self) {
        for worker in self.snapshot() {
            worker.join();
        }
    }

    pub fn get_worker(&self, camera_id: CameraId) -> Option<Arc<CameraWorker>> {
        self.workers.lock().get(&camera_id).cloned()
    }

    pub fn reload_worker_gates(&self, camera_id: CameraId) -> Result<usize> {
        self.require(camera_id)?.reload_gates()
    }

    pub fn stop_worker(&self, camera_id: CameraId) -> Result<()> {
        self.require(camera_id)?.stop();
        Ok(())
    }

    /// 停止并移除工作线程, 同时清除其推流帧
    pub fn remove_worker(&self, camera_id: CameraId) -> Result<()> {
        let worker = self
            .workers
            .lock()
            .remove(&camera_id)
            .ok_or(SentinelError::CameraNotFound(camera_id))?;
        worker.stop();
        worker.join();
        self.context.frame_buffer.remove(camera_id);
        info!(camera_id, "工作线程已移除");
        Ok(())
    }

    pub fn is_alive(&self, camera_id: CameraId) -> bool {
        self.get_worker(camera_id)
            .is_some_and(|worker| worker.is_running())
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.workers.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        let mut status: Vec<WorkerStatus> = self
            .snapshot()
            .iter()
            .map(|w| WorkerStatus {
                camera_id: w.camera_id(),
                running: w.is_running(),
                gates: w.gates().len(),
                frames: w.frames_processed(),
                events: w.events_emitted(),
            })
            .collect();
        status.sort_by_key(|s| s.camera_id);
        status
    }

    /// 打不开时返回延迟帧源, 由工作线程重试
    fn open_source(&self, camera: &CameraRecord) -> Box<dyn FrameSource> {
        match self.factory.open_source(camera) {
            Ok(source) => source,
            Err(e) => {
                warn!(camera_id = camera.camera_id, url = %camera.url, error = %e, "视频源打开失败, 稍后重试");
                let factory = Arc::clone(&self.factory);
                let record = camera.clone();
                Box::new(DeferredSource::pending(
                    camera.url.clone(),
                    Box::new(move || factory.open_source(&record)),
                ))
            }
        }
    }

    fn require(&self, camera_id: CameraId) -> Result<Arc<CameraWorker>> {
        self.get_worker(camera_id)
            .ok_or(SentinelError::CameraNotFound(camera_id))
    }

    fn snapshot(&self) -> Vec<Arc<CameraWorker>> {
        self.workers.lock().values().cloned().collect()
    }
}

/// 默认协作方:
/// - 目录或图片文件 → ImageSequenceSource
/// - 其他地址 → FfmpegSource (需要 `ffmpeg` 特性)
/// - `<replay_dir>/<camera_id>.jsonl` 存在时使用 ReplayTracker, 否则 NullTracker
pub struct DefaultCollaborators {
    pub reference_width: u32,
    pub reference_height: u32,
    pub playback_fps: u32,
    pub replay_dir: Option<PathBuf>,
    pub use_keypoints: bool,
}

impl DefaultCollaborators {
    pub fn replay_path(&self, camera_id: CameraId) -> Option<PathBuf> {
        self.replay_dir
            .as_ref()
            .map(|dir| dir.join(format!("{camera_id}.jsonl")))
            .filter(|path| path.is_file())
    }
}

impl CollaboratorFactory for DefaultCollaborators {
    fn open_source(&self, camera: &CameraRecord) -> Result<Box<dyn FrameSource>> {
        let path = Path::new(&camera.url);
        if path.is_dir() || (path.is_file() && image::ImageFormat::from_path(path).is_ok()) {
            return Ok(Box::new(ImageSequenceSource::open(path, self.playback_fps)?));
        }
        open_stream(self, &camera.url)
    }

    fn open_tracker(&self, camera: &CameraRecord) -> Result<Box<dyn Tracker>> {
        match self.replay_path(camera.camera_id) {
            Some(path) => Ok(Box::new(ReplayTracker::from_file(path, self.use_keypoints)?)),
            None => {
                info!(camera_id = camera.camera_id, "未找到跟踪回放, 使用空跟踪器");
                Ok(Box::new(NullTracker))
            }
        }
    }
}

#[cfg(feature = "ffmpeg")]
fn open_stream(factory: &DefaultCollaborators, url: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(crate::input::FfmpegSource::open(
        url,
        factory.reference_width,
        factory.reference_height,
    )?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_stream(_factory: &DefaultCollaborators, url: &str) -> Result<Box<dyn FrameSource>> {
    Err(SentinelError::Source(format!(
        "未启用 ffmpeg 特性, 无法打开 {url}"
    )))
}
