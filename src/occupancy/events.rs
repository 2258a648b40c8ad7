//! 状态转移事件 (只追加, 写入后不再修改)

use chrono::{DateTime, Local};

use crate::roi::roi_label;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Entered,
    Left,
    AlertTriggered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entered => "Person Entered",
            Self::Left => "Person Left",
            Self::AlertTriggered => "Alert Triggered",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub timestamp: DateTime<Local>,
    pub roi_index: usize,
    pub kind: EventKind,
    /// `Left` 事件不携带置信度
    pub confidence: Option<f32>,
}

impl DetectionEvent {
    pub fn roi_label(&self) -> String {
        roi_label(self.roi_index)
    }

    /// 本地时间 "YYYY-MM-DD HH:MM:SS"
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
