//! 状态看板: 检测线程写, 界面线程读 (单槽, 后写覆盖)
use parking_lot::Mutex;
use std::fmt;

use crate::detection::types::Frame;
use crate::occupancy::RoiStatus;

pub const WAITING_TEXT: &str = "Waiting for person...";
pub const STOPPED_TEXT: &str = "Status: Camera stopped";
pub const DETECTION_OFF_TEXT: &str = "Status: Detection stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    Running,
    Paused,
    #[default]
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Running => "running",
            LoopState::Paused => "paused",
            LoopState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: LoopState,
    pub lines: Vec<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::stopped()
    }
}

impl StatusSnapshot {
    /// 每个占用中的ROI一行; 无人时显示等待
    pub fn running(rois: &[RoiStatus]) -> Self {
        let lines = if rois.is_empty() {
            vec![WAITING_TEXT.to_string()]
        } else {
            rois.iter().map(RoiStatus::describe).collect()
        };
        Self {
            state: LoopState::Running,
            lines,
        }
    }

    /// 检测已关闭, 画面照常刷新
    pub fn detection_off() -> Self {
        Self {
            state: LoopState::Running,
            lines: vec![DETECTION_OFF_TEXT.to_string()],
        }
    }

    pub fn stopped() -> Self {
        Self {
            state: LoopState::Stopped,
            lines: vec![STOPPED_TEXT.to_string()],
        }
    }

    pub fn text(&self) -> String {
        self.lines.join(" | ")
    }
}

#[derive(Default)]
pub struct StatusBoard {
    frame: Mutex<Option<Frame>>,
    status: Mutex<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_frame(&self, frame: Frame) {
        *self.frame.lock() = Some(frame);
    }

    pub fn publish_status(&self, status: StatusSnapshot) {
        *self.status.lock() = status;
    }

    /// 只改状态, 保留状态文字
    pub fn set_state(&self, state: LoopState) {
        self.status.lock().state = state;
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.frame.lock().clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_lines() {
        assert_eq!(StatusSnapshot::running(&[]).lines, vec![WAITING_TEXT]);

        let rois = [
            RoiStatus {
                roi_index: 0,
                remaining: Duration::from_millis(9_400),
                alert_fired: false,
            },
            RoiStatus {
                roi_index: 2,
                remaining: Duration::ZERO,
                alert_fired: true,
            },
        ];
        let snapshot = StatusSnapshot::running(&rois);
        assert_eq!(snapshot.text(), "ROI 1: Alert in 9s | ROI 3: Alert!");
        assert_eq!(StatusSnapshot::default().text(), STOPPED_TEXT);
    }

    #[test]
    fn test_last_writer_wins() {
        let board = StatusBoard::new();
        assert!(board.latest_frame().is_none());

        board.publish_frame(std::sync::Arc::new(image::RgbImage::new(2, 2)));
        board.publish_frame(std::sync::Arc::new(image::RgbImage::new(4, 4)));
        assert_eq!(board.latest_frame().unwrap().width(), 4);

        board.publish_status(StatusSnapshot::running(&[]));
        board.set_state(LoopState::Paused);
        let status = board.status();
        assert_eq!(status.state, LoopState::Paused);
        assert_eq!(status.lines, vec![WAITING_TEXT]);
    }
}
