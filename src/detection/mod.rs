/// 跟踪系统 (Tracking collaborator)
///
/// 检测与跟踪推理在外部完成, 工作线程只消费跟踪结果
/// - types:   检测框 / 关键点 / 跟踪目标
/// - tracker: Tracker 接口与回放实现
pub mod tracker;
pub mod types;

pub use tracker::{id_to_color, NullTracker, ReplayTracker, Tracker};
pub use types::{BBox, Detection, PoseKeypoints, TrackId};
