/// 检测流水线 (Detection Pipeline)
///
/// 检测线程独占ROI与状态机, 界面线程只读取发布出来的画面和状态:
/// - Controller: 启动 / 停止 / 暂停修改ROI / 运行参数
/// - Loop:       取帧 → 检测 → 状态机 → 告警 / 日志
/// - Annotate:   ROI边框与人形框叠加
/// - Status:     最新画面与状态文字 (后写覆盖)
/// - Recorder:   标注画面录制
pub mod annotate;
pub mod controller;
pub mod detection_loop;
pub mod recorder;
pub mod status;

pub use annotate::Annotator;
pub use controller::{Sentinel, SourceOpener};
pub use detection_loop::{
    AlertDispatch, Clock, ControlMessage, DetectionLoop, StepReport, SystemClock,
};
pub use recorder::{FrameSink, JpegSequenceRecorder};
pub use status::{LoopState, StatusBoard, StatusSnapshot};
