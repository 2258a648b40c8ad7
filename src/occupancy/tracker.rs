//! 停留状态机 (Occupancy tracker)
//!
//! 每个ROI一份稀疏状态: map 中存在 key 即表示该ROI处于连续占用区间。
//! 离开一帧即丢弃全部状态 (进入时间、告警标记、证据帧), 重新进入从零计时。

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::events::{DetectionEvent, EventKind};
use super::evidence::EvidenceBuffer;
use crate::config::{
    validate_evidence_frames, validate_wait_time, DEFAULT_EVIDENCE_FRAMES, DEFAULT_WAIT_TIME_SECS,
};
use crate::detection::types::Frame;
use crate::error::ConfigError;
use crate::roi::roi_label;

/// 一次观测的时刻: 单调时钟用于计时, 本地时间用于事件记录
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub instant: Instant,
    pub wall: DateTime<Local>,
}

impl Tick {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Local::now(),
        }
    }
}

/// 单个ROI的占用状态
#[derive(Debug, Clone)]
pub struct OccupancyState {
    pub entered_at: Instant,
    pub alert_fired: bool,
    evidence: EvidenceBuffer,
}

impl OccupancyState {
    pub fn evidence(&self) -> &EvidenceBuffer {
        &self.evidence
    }
}

/// observe() 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// 无人且无状态
    Idle,
    /// 新的占用区间开始, 开始采集证据帧
    Entered(DetectionEvent),
    /// 仍在计时
    Waiting { remaining: Duration },
    /// 停留超时, 立即告警 (每个区间只出现一次)
    Fire(DetectionEvent),
    /// 已告警, 人仍在区域内
    Alarmed,
    /// 区间结束, 状态已销毁
    Left(DetectionEvent),
}

impl Transition {
    pub fn event(&self) -> Option<&DetectionEvent> {
        match self {
            Self::Entered(e) | Self::Fire(e) | Self::Left(e) => Some(e),
            _ => None,
        }
    }

    /// 该ROI当前是否处于占用区间
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Entered(_) | Self::Waiting { .. } | Self::Fire(_) | Self::Alarmed
        )
    }
}

/// 状态栏中一个ROI的快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiStatus {
    pub roi_index: usize,
    pub remaining: Duration,
    pub alert_fired: bool,
}

impl RoiStatus {
    pub fn describe(&self) -> String {
        if self.alert_fired || self.remaining.is_zero() {
            format!("{}: Alert!", roi_label(self.roi_index))
        } else {
            format!(
                "{}: Alert in {}s",
                roi_label(self.roi_index),
                self.remaining.as_secs()
            )
        }
    }
}

#[derive(Debug)]
pub struct OccupancyTracker {
    wait_time: Duration,
    evidence_frames: usize,
    states: BTreeMap<usize, OccupancyState>,
}

impl Default for OccupancyTracker {
    fn default() -> Self {
        Self::new(
            Duration::from_secs_f64(DEFAULT_WAIT_TIME_SECS),
            DEFAULT_EVIDENCE_FRAMES,
        )
    }
}

impl OccupancyTracker {
    pub fn new(wait_time: Duration, evidence_frames: usize) -> Self {
        Self {
            wait_time,
            evidence_frames: evidence_frames.max(1),
            states: BTreeMap::new(),
        }
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// 非法值被拒绝, 原值保持不变
    pub fn set_wait_time_secs(&mut self, secs: f64) -> Result<(), ConfigError> {
        self.wait_time = validate_wait_time(secs)?;
        Ok(())
    }

    /// 只影响之后开始的占用区间
    pub fn set_evidence_frames(&mut self, count: usize) -> Result<(), ConfigError> {
        self.evidence_frames = validate_evidence_frames(count)?;
        Ok(())
    }

    /// 每帧每个ROI调用一次
    pub fn observe(
        &mut self,
        roi_index: usize,
        person_detected: bool,
        confidence: Option<f32>,
        tick: Tick,
    ) -> Transition {
        let event = |kind, confidence| DetectionEvent {
            timestamp: tick.wall,
            roi_index,
            kind,
            confidence,
        };

        match (person_detected, self.states.get_mut(&roi_index)) {
            (true, None) => {
                self.states.insert(
                    roi_index,
                    OccupancyState {
                        entered_at: tick.instant,
                        alert_fired: false,
                        evidence: EvidenceBuffer::new(self.evidence_frames),
                    },
                );
                Transition::Entered(event(EventKind::Entered, confidence))
            }
            (true, Some(state)) => {
                let elapsed = tick.instant.saturating_duration_since(state.entered_at);
                if state.alert_fired {
                    Transition::Alarmed
                } else if elapsed >= self.wait_time {
                    state.alert_fired = true;
                    Transition::Fire(event(EventKind::AlertTriggered, confidence))
                } else {
                    Transition::Waiting {
                        remaining: self.wait_time.saturating_sub(elapsed),
                    }
                }
            }
            (false, Some(_)) => {
                self.states.remove(&roi_index);
                Transition::Left(event(EventKind::Left, None))
            }
            (false, None) => Transition::Idle,
        }
    }

    /// 采集证据帧; 仅在区间进行中且未满时接收
    pub fn capture(&mut self, roi_index: usize, frame: Frame) -> bool {
        match self.states.get_mut(&roi_index) {
            Some(state) => state.evidence.push(frame),
            None => false,
        }
    }

    /// 当前证据帧 (不清空, 区间结束时才丢弃)
    pub fn evidence(&self, roi_index: usize) -> Vec<Frame> {
        self.states
            .get(&roi_index)
            .map(|s| s.evidence.frames().to_vec())
            .unwrap_or_default()
    }

    pub fn state(&self, roi_index: usize) -> Option<&OccupancyState> {
        self.states.get(&roi_index)
    }

    pub fn is_active(&self, roi_index: usize) -> bool {
        self.states.contains_key(&roi_index)
    }

    pub fn active_count(&self) -> usize {
        self.states.len()
    }

    /// 丢弃全部ROI的状态与证据帧
    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// 所有进行中区间的快照 (按ROI顺序)
    pub fn status(&self, now: Instant) -> Vec<RoiStatus> {
        self.states
            .iter()
            .map(|(&roi_index, state)| {
                let elapsed = now.saturating_duration_since(state.entered_at);
                RoiStatus {
                    roi_index,
                    remaining: self.wait_time.saturating_sub(elapsed),
                    alert_fired: state.alert_fired,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::Arc;

    struct Script {
        t0: Instant,
        w0: DateTime<Local>,
    }

    impl Script {
        fn new() -> Self {
            Self {
                t0: Instant::now(),
                w0: Local::now(),
            }
        }

        fn at(&self, secs: u64) -> Tick {
            Tick {
                instant: self.t0 + Duration::from_secs(secs),
                wall: self.w0 + chrono::Duration::seconds(secs as i64),
            }
        }
    }

    fn kinds(outcomes: &[Transition]) -> Vec<(usize, EventKind)> {
        outcomes
            .iter()
            .enumerate()
            .filter_map(|(t, o)| o.event().map(|e| (t, e.kind)))
            .collect()
    }

    #[test]
    fn test_continuous_presence_fires_once_at_wait_time() {
        let clock = Script::new();
        let mut tracker = OccupancyTracker::new(Duration::from_secs(10), 4);

        let outcomes: Vec<Transition> = (0..=15)
            .map(|t| tracker.observe(0, true, Some(0.8), clock.at(t)))
            .collect();

        assert_eq!(
            kinds(&outcomes),
            vec![(0, EventKind::Entered), (10, EventKind::AlertTriggered)]
        );
        assert_eq!(
            outcomes[1],
            Transition::Waiting {
                remaining: Duration::from_secs(9)
            }
        );
        assert!(outcomes[11..].iter().all(|o| *o == Transition::Alarmed));
    }

    #[test]
    fn test_status_lines() {
        let clock = Script::new();
        let mut tracker = OccupancyTracker::new(Duration::from_secs(10), 4);
        tracker.observe(0, true, None, clock.at(0));
        assert_eq!(tracker.status(clock.at(1).instant)[0].describe(), "ROI 1: Alert in 9s");

        for t in 1..=10 {
            tracker.observe(0, true, None, clock.at(t));
        }
        assert_eq!(tracker.status(clock.at(10).instant)[0].describe(), "ROI 1: Alert!");
    }

    #[test]
    fn test_absence_restarts_dwell_timer() {
        let clock = Script::new();
        let mut tracker = OccupancyTracker::new(Duration::from_secs(10), 4);

        let outcomes: Vec<Transition> = (0..=14)
            .map(|t| tracker.observe(2, t != 5, Some(0.7), clock.at(t)))
            .collect();

        assert_eq!(
            kinds(&outcomes),
            vec![
                (0, EventKind::Entered),
                (5, EventKind::Left),
                (6, EventKind::Entered)
            ]
        );
        assert_eq!(tracker.state(2).unwrap().entered_at, clock.at(6).instant);
    }

    #[test]
    fn test_left_omits_confidence() {
        let clock = Script::new();
        let mut tracker = OccupancyTracker::default();
        tracker.observe(0, true, Some(0.9), clock.at(0));
        let left = tracker.observe(0, false, Some(0.3), clock.at(1));
        assert_eq!(left.event().unwrap().confidence, None);
        assert_eq!(tracker.observe(0, false, None, clock.at(2)), Transition::Idle);
    }

    #[test]
    fn test_rois_are_independent() {
        let clock = Script::new();
        let mut tracker = OccupancyTracker::new(Duration::from_secs(2), 4);
        tracker.observe(0, true, None, clock.at(0));
        tracker.observe(1, true, None, clock.at(1));
        assert!(matches!(tracker.observe(0, true, None, clock.at(2)), Transition::Fire(_)));
        assert!(matches!(tracker.observe(1, true, None, clock.at(2)), Transition::Waiting { .. }));
        assert!(matches!(tracker.observe(1, false, None, clock.at(3)), Transition::Left(_)));
        assert!(tracker.is_active(0));
        assert!(!tracker.is_active(1));
    }

    #[test]
    fn test_evidence_bounded_and_discarded_on_leave() {
        let clock = Script::new();
        let mut tracker = OccupancyTracker::new(Duration::from_secs(10), 4);
        let frame: Frame = Arc::new(RgbImage::new(4, 4));

        assert!(!tracker.capture(0, frame.clone()), "无区间时不采集");

        tracker.observe(0, true, None, clock.at(0));
        let accepted = (0..6).filter(|_| tracker.capture(0, frame.clone())).count();
        assert_eq!(accepted, 4);
        assert_eq!(tracker.evidence(0).len(), 4);
        // evidence() 不清空
        assert_eq!(tracker.evidence(0).len(), 4);

        tracker.observe(0, false, None, clock.at(1));
        assert!(tracker.evidence(0).is_empty());

        tracker.observe(0, true, None, clock.at(2));
        assert!(tracker.capture(0, frame));
        assert_eq!(tracker.evidence(0).len(), 1);
    }

    #[test]
    fn test_clear_drops_all_state() {
        let clock = Script::new();
        let mut tracker = OccupancyTracker::default();
        for roi in 0..3 {
            tracker.observe(roi, true, None, clock.at(0));
        }
        tracker.clear();
        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.status(clock.at(1).instant).is_empty());
        assert_eq!(tracker.observe(1, false, None, clock.at(1)), Transition::Idle);
    }

    #[test]
    fn test_invalid_wait_time_keeps_previous() {
        let mut tracker = OccupancyTracker::new(Duration::from_secs(10), 4);
        assert!(tracker.set_wait_time_secs(-3.0).is_err());
        assert_eq!(tracker.wait_time(), Duration::from_secs(10));
        tracker.set_wait_time_secs(2.5).unwrap();
        assert_eq!(tracker.wait_time(), Duration::from_millis(2500));
    }
}
