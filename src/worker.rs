//! 摄像头工作线程 (CameraWorker)
//!
//! 每个摄像头一个独立线程:
//! 取帧 → 缩放到参考分辨率 → 跟踪 → 越线判定 → 事件投递 → 标注 → 推流缓冲
//!
//! 取帧失败或流结束时回到开头重试, 不会自行退出; `stop()` 为协作式停止。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, WorkerConfig};
use crate::detection::Tracker;
use crate::engine::{FrameClock, GateEngine};
use crate::error::{Result, SentinelError};
use crate::gate::{CameraId, GateConfigStore, GateSet};
use crate::input::{FrameResizer, FrameSource};
use crate::render::Annotator;
use crate::sink::EventSink;
use crate::stream::{AnnotatedFrame, FrameBuffer};

/// 工作线程控制接口
pub trait ControllableWorker: Send + Sync {
    fn camera_id(&self) -> CameraId;

    /// 启动工作线程 (每个实例只能启动一次)
    fn start(&self) -> Result<()>;

    /// 协作式停止, 当前帧处理完后退出
    fn stop(&self);

    /// 重新解析门线并整体替换快照, 返回门线数量
    fn reload_gates(&self) -> Result<usize>;

    fn is_running(&self) -> bool;
}

/// 所有工作线程共用的协作方与参数
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<GateConfigStore>,
    pub sink: Arc<dyn EventSink>,
    pub frame_buffer: Arc<FrameBuffer>,
    pub annotator: Arc<Annotator>,
    pub engine: EngineConfig,
    pub worker: WorkerConfig,
}

/// 控制线程与工作线程共享的状态
struct WorkerShared {
    camera_id: CameraId,
    active: AtomicBool,
    gates: RwLock<Arc<GateSet>>,
    frames: AtomicU64,
    events: AtomicU64,
}

pub struct CameraWorker {
    shared: Arc<WorkerShared>,
    store: Arc<GateConfigStore>,
    pending: Mutex<Option<WorkerLoop>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CameraWorker {
    pub fn new(
        camera_id: CameraId,
        source: Box<dyn FrameSource>,
        tracker: Box<dyn Tracker>,
        ctx: &WorkerContext,
    ) -> Self {
        // 门线解析失败时以空快照运行, 之后可通过 reload 恢复
        let gates = ctx.store.resolve(camera_id).unwrap_or_else(|e| {
            warn!(camera_id, error = %e, "门线解析失败, 以空门线运行");
            GateSet::empty(camera_id)
        });

        let shared = Arc::new(WorkerShared {
            camera_id,
            active: AtomicBool::new(false),
            gates: RwLock::new(Arc::new(gates)),
            frames: AtomicU64::new(0),
            events: AtomicU64::new(0),
        });

        let (width, height) = ctx.store.reference_size();
        let pending = WorkerLoop {
            shared: Arc::clone(&shared),
            source,
            tracker,
            engine: GateEngine::new(camera_id, ctx.engine.clone()),
            resizer: FrameResizer::new(width, height),
            sink: Arc::clone(&ctx.sink),
            frame_buffer: Arc::clone(&ctx.frame_buffer),
            annotator: Arc::clone(&ctx.annotator),
            config: ctx.worker.clone(),
            seq: 0,
        };

        Self {
            shared,
            store: Arc::clone(&ctx.store),
            pending: Mutex::new(Some(pending)),
            thread: Mutex::new(None),
        }
    }

    /// 当前门线快照
    pub fn gates(&self) -> Arc<GateSet> {
        Arc::clone(&*self.shared.gates.read())
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn events_emitted(&self) -> u64 {
        self.shared.events.load(Ordering::Relaxed)
    }

    /// 等待线程退出 (需先 stop)
    pub fn join(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            error!(camera_id = self.shared.camera_id, "工作线程异常退出");
        }
    }
}

impl ControllableWorker for CameraWorker {
    fn camera_id(&self) -> CameraId {
        self.shared.camera_id
    }

    fn start(&self) -> Result<()> {
        let camera_id = self.shared.camera_id;
        let worker_loop = self
            .pending
            .lock()
            .take()
            .ok_or(SentinelError::AlreadyStarted(camera_id))?;

        self.shared.active.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name(format!("camera-{camera_id}"))
            .spawn(move || worker_loop.run());

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.active.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    fn stop(&self) {
        if self.shared.active.swap(false, Ordering::AcqRel) {
            info!(camera_id = self.shared.camera_id, "停止工作线程");
        }
    }

    fn reload_gates(&self) -> Result<usize> {
        let gates = self.store.resolve(self.shared.camera_id)?;
        let count = gates.len();
        *self.shared.gates.write() = Arc::new(gates);
        info!(camera_id = self.shared.camera_id, gates = count, "门线已重载");
        Ok(count)
    }

    fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
            && self
                .thread
                .lock()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }
}

/// 工作线程独占的状态
struct WorkerLoop {
    shared: Arc<WorkerShared>,
    source: Box<dyn FrameSource>,
    tracker: Box<dyn Tracker>,
    engine: GateEngine,
    resizer: FrameResizer,
    sink: Arc<dyn EventSink>,
    frame_buffer: Arc<FrameBuffer>,
    annotator: Arc<Annotator>,
    config: WorkerConfig,
    seq: u64,
}

impl WorkerLoop {
    fn run(mut self) {
        let camera_id = self.shared.camera_id;
        info!(camera_id, source = %self.source.describe(), "工作线程启动");

        let mut misses = 0u32;
        let mut window_start = Instant::now();
        let mut window_frames = 0u32;
        let mut window_detections = 0usize;

        while self.shared.active.load(Ordering::Acquire) {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => {
                    misses = 0;
                    frame
                }
                Ok(None) => {
                    debug!(camera_id, "视频流结束, 回到开头");
                    misses += 1;
                    self.rewind();
                    // 连续拿不到帧时 (空序列 / 断流) 放慢重试
                    if misses > 1 {
                        thread::sleep(self.config.retry_delay());
                    }
                    continue;
                }
                Err(e) => {
                    warn!(camera_id, error = %e, "取帧失败, 重新打开视频源");
                    self.rewind();
                    thread::sleep(self.config.retry_delay());
                    continue;
                }
            };

            window_detections += self.process(frame);
            window_frames += 1;

            // 每秒打印一次处理统计
            let elapsed = window_start.elapsed().as_secs_f64();
            if elapsed >= 1.0 {
                debug!(
                    camera_id,
                    fps = %format_args!("{:.1}", window_frames as f64 / elapsed),
                    detections = window_detections,
                    tracked_pairs = self.engine.tracked_pairs(),
                    "工作线程统计"
                );
                window_start = Instant::now();
                window_frames = 0;
                window_detections = 0;
            }
        }

        info!(camera_id, frames = self.shared.frames.load(Ordering::Relaxed), "工作线程退出");
    }

    /// 视频源回到开头, 跟踪器与判定状态同时清空
    fn rewind(&mut self) {
        if let Err(e) = self.source.rewind() {
            warn!(camera_id = self.shared.camera_id, error = %e, "视频源重置失败");
        }
        self.tracker.reset();
        self.engine.reset();
    }

    /// 处理一帧, 返回检测目标数
    fn process(&mut self, frame: RgbaImage) -> usize {
        let camera_id = self.shared.camera_id;
        let mut image = self.resizer.fit(frame);

        let detections = self.tracker.update(&image).unwrap_or_else(|e| {
            warn!(camera_id, error = %e, "跟踪失败, 按无目标处理");
            Vec::new()
        });

        // 每帧只读取一次快照
        let gates = Arc::clone(&*self.shared.gates.read());
        let clock = FrameClock::now();

        let events = self.engine.process(&gates, &detections, &clock);
        self.shared
            .events
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        for event in events {
            self.sink.submit(event);
        }

        if self.config.annotate {
            self.annotator
                .annotate(&mut image, &gates, &self.engine, &detections, clock.instant);
        }

        self.seq += 1;
        self.frame_buffer.publish(AnnotatedFrame {
            camera_id,
            seq: self.seq,
            captured_at: clock.wall,
            image,
        });
        self.shared.frames.fetch_add(1, Ordering::Relaxed);
        detections.len()
    }
}
