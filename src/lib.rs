#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 监控参数与邮件配置
pub mod detection; // 人形检测
pub mod error; // 错误类型
pub mod event_log; // CSV事件日志
pub mod input; // 视频输入系统
pub mod notify; // 声音 / 邮件告警
pub mod occupancy; // 停留状态机与证据帧
pub mod pipeline; // 检测循环与控制器
pub mod roi; // ROI注册表

pub use crate::config::{EmailConfig, SentinelConfig};
pub use crate::detection::{BBox, Detector, PersonPresence};
pub use crate::error::{ConfigError, NotifyError, SentinelError, SourceError};
pub use crate::event_log::{CsvEventLog, EventSink};
pub use crate::input::FrameSource;
pub use crate::notify::{Notifier, NotifyOutcome};
pub use crate::occupancy::{DetectionEvent, EventKind, OccupancyTracker, Transition};
pub use crate::pipeline::{ControlMessage, Sentinel, StatusSnapshot};
pub use crate::roi::{Rect, Roi, RoiRegistry};

/// 带分隔符的本地时间字符串 (录制目录、日志文件名)
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}
