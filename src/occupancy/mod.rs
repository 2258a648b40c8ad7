/// 停留监控核心 (Occupancy core)
///
/// 只在检测线程内被修改:
/// - Tracker:  每ROI停留状态机 + 告警去抖
/// - Evidence: 每个占用区间的证据帧缓存
/// - Events:   状态转移事件
pub mod events;
pub mod evidence;
pub mod tracker;

pub use events::{DetectionEvent, EventKind};
pub use evidence::EvidenceBuffer;
pub use tracker::{OccupancyState, OccupancyTracker, RoiStatus, Tick, Transition};
