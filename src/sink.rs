//! 事件出口 (EventSink)
//!
//! 工作线程只做非阻塞投递; 落库在独立线程中完成。
//! 队列满或落库失败时丢弃事件并记录日志, 不影响检测循环。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::engine::CrossingEvent;
use crate::error::Result;
use crate::storage::Storage;

pub trait EventSink: Send + Sync {
    /// 投递事件, 不阻塞调用方
    fn submit(&self, event: CrossingEvent);
}

/// 直接投递到通道 (测试 / 自定义消费方)
impl EventSink for Sender<CrossingEvent> {
    fn submit(&self, event: CrossingEvent) {
        if let Err(e) = self.try_send(event) {
            warn!(error = %e, "事件通道不可用, 事件已丢弃");
        }
    }
}

enum SinkMessage {
    Event(CrossingEvent),
    Shutdown,
}

#[derive(Default)]
struct SinkStats {
    persisted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// 落库出口: 有界队列 + 持久化线程
pub struct StorageSink {
    tx: Sender<SinkMessage>,
    stats: Arc<SinkStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StorageSink {
    pub fn spawn(storage: Arc<dyn Storage>, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        let stats = Arc::new(SinkStats::default());
        let worker_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("event-sink".into())
            .spawn(move || persist_loop(storage, rx, worker_stats))?;
        info!(capacity, "事件落库线程已启动");
        Ok(Self {
            tx,
            stats,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn persisted(&self) -> u64 {
        self.stats.persisted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// 处理完队列中已有的事件后退出落库线程
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        // 阻塞发送, 保证关闭消息排在已投递事件之后
        if self.tx.send(SinkMessage::Shutdown).is_err() {
            warn!("落库线程已退出");
        }
        if handle.join().is_err() {
            error!("落库线程异常退出");
        }
        info!(
            persisted = self.persisted(),
            dropped = self.dropped(),
            failed = self.failed(),
            "事件落库线程已停止"
        );
    }
}

impl EventSink for StorageSink {
    fn submit(&self, event: CrossingEvent) {
        match self.tx.try_send(SinkMessage::Event(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(SinkMessage::Event(event))) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    camera_id = event.camera_id,
                    gate_id = event.gate_id,
                    track_id = event.track_id,
                    "事件队列已满, 事件已丢弃"
                );
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("落库线程已停止, 事件已丢弃");
            }
        }
    }
}

impl Drop for StorageSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn persist_loop(storage: Arc<dyn Storage>, rx: Receiver<SinkMessage>, stats: Arc<SinkStats>) {
    for message in rx.iter() {
        let event = match message {
            SinkMessage::Event(event) => event,
            SinkMessage::Shutdown => break,
        };
        match storage.insert_event(&event) {
            Ok(()) => {
                stats.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(camera_id = event.camera_id, gate_id = event.gate_id, "事件已保存");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    camera_id = event.camera_id,
                    gate_id = event.gate_id,
                    error = %e,
                    "事件保存失败"
                );
            }
        }
    }
}
