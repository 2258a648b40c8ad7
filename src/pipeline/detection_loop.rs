//! 检测循环 (Detection loop)
//! 职责: 取帧 → 按ROI裁剪检测 → 停留状态机 → 证据帧 / 告警 / 事件日志 → 发布画面与状态
//!
//! 循环独占ROI注册表和状态机, 运行参数只通过 ControlMessage 在两帧之间修改。

use crossbeam_channel::Receiver;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::annotate::Annotator;
use super::recorder::FrameSink;
use super::status::{LoopState, StatusBoard, StatusSnapshot};
use crate::config::{validate_conf_threshold, SentinelConfig, DEFAULT_CONF_THRESHOLD};
use crate::detection::types::{reduce_person, Frame, PersonPresence};
use crate::detection::Detector;
use crate::error::{Result, SentinelError};
use crate::event_log::EventSink;
use crate::input::FrameSource;
use crate::notify::{Notifier, NotifyOutcome};
use crate::occupancy::{DetectionEvent, OccupancyTracker, Tick, Transition};
use crate::roi::{roi_label, RoiRegistry};

/// 运行参数调整 (控制端 → 检测线程), 在下一帧开始前生效
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    SetWaitTime(f64),
    SetConfThreshold(f32),
    SetEvidenceFrames(usize),
    SetFrameDelay(Duration),
    ToggleDetection(bool),
}

/// 观测时刻来源
pub trait Clock: Send {
    fn now(&self) -> Tick;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Tick {
        Tick::now()
    }
}

/// 一次告警的派发结果
#[derive(Clone, Debug, PartialEq)]
pub struct AlertDispatch {
    pub roi_index: usize,
    pub audio: NotifyOutcome,
    pub email: NotifyOutcome,
}

/// 单帧处理结果
#[derive(Clone, Debug, Default)]
pub struct StepReport {
    pub events: Vec<DetectionEvent>,
    pub alerts: Vec<AlertDispatch>,
}

pub struct DetectionLoop {
    source: Option<Box<dyn FrameSource>>,
    detector: Box<dyn Detector>,
    rois: RoiRegistry,
    tracker: OccupancyTracker,
    notifier: Arc<Notifier>,
    events: Box<dyn EventSink>,
    recorder: Option<Box<dyn FrameSink>>,
    annotator: Annotator,
    board: Arc<StatusBoard>,
    clock: Box<dyn Clock>,
    control: Receiver<ControlMessage>,

    conf_threshold: f32,
    frame_delay: Duration,
    detection_enabled: bool,
    frames: u64,
}

impl DetectionLoop {
    pub fn new(
        detector: Box<dyn Detector>,
        notifier: Arc<Notifier>,
        events: Box<dyn EventSink>,
        board: Arc<StatusBoard>,
        control: Receiver<ControlMessage>,
    ) -> Self {
        Self {
            source: None,
            detector,
            rois: RoiRegistry::new(),
            tracker: OccupancyTracker::default(),
            notifier,
            events,
            recorder: None,
            annotator: Annotator::default(),
            board,
            clock: Box::new(SystemClock),
            control,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            frame_delay: Duration::from_millis(crate::config::DEFAULT_FRAME_DELAY_MS),
            detection_enabled: true,
            frames: 0,
        }
    }

    /// 应用配置文件中的参数 (调用前应已 validate)
    pub fn with_config(mut self, config: &SentinelConfig) -> Self {
        self.tracker = OccupancyTracker::new(config.wait_time(), config.evidence_frames);
        self.conf_threshold = validate_conf_threshold(config.conf_threshold)
            .unwrap_or(DEFAULT_CONF_THRESHOLD);
        self.frame_delay = config.frame_delay();
        self.annotator = Annotator::load(config.label_font.as_deref());
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_recorder(mut self, recorder: Box<dyn FrameSink>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn attach_source(&mut self, source: Box<dyn FrameSource>) {
        self.release_source();
        info!("📹 输入源: {}", source.describe());
        self.source = Some(source);
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// 释放输入源 (可重复调用)
    pub fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }

    pub fn rois(&self) -> &RoiRegistry {
        &self.rois
    }

    pub fn rois_mut(&mut self) -> &mut RoiRegistry {
        &mut self.rois
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut OccupancyTracker {
        &mut self.tracker
    }

    pub fn conf_threshold(&self) -> f32 {
        self.conf_threshold
    }

    pub fn frame_delay(&self) -> Duration {
        self.frame_delay
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// 处理积压的控制消息
    pub fn apply_controls(&mut self) {
        while let Ok(msg) = self.control.try_recv() {
            self.apply(msg);
        }
    }

    fn apply(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::SetWaitTime(secs) => match self.tracker.set_wait_time_secs(secs) {
                Ok(()) => info!("⚙️ 停留时间: {:.1}s", secs),
                Err(e) => warn!("⚠️ {}", e),
            },
            ControlMessage::SetConfThreshold(conf) => match validate_conf_threshold(conf) {
                Ok(conf) => {
                    self.conf_threshold = conf;
                    info!("⚙️ 置信度阈值: {:.2}", conf);
                }
                Err(e) => warn!("⚠️ {}", e),
            },
            ControlMessage::SetEvidenceFrames(count) => {
                match self.tracker.set_evidence_frames(count) {
                    Ok(()) => info!("⚙️ 证据帧数: {}", count),
                    Err(e) => warn!("⚠️ {}", e),
                }
            }
            ControlMessage::SetFrameDelay(delay) => {
                self.frame_delay = delay;
                info!("⚙️ 帧间隔: {}ms", delay.as_millis());
            }
            ControlMessage::ToggleDetection(enabled) => {
                if !enabled {
                    // 关闭检测时丢弃所有占用区间, 不写离开事件
                    self.tracker.clear();
                }
                self.detection_enabled = enabled;
                info!("🔍 检测: {}", if enabled { "开启" } else { "关闭" });
            }
        }
    }

    /// 处理一帧; 输入源读取失败或结束时返回错误
    pub fn step(&mut self) -> Result<StepReport> {
        let source = self.source.as_mut().ok_or(SentinelError::SourceExhausted)?;
        let image = source.read()?.ok_or(SentinelError::SourceExhausted)?;
        let tick = self.clock.now();
        self.frames += 1;

        let observations = if self.detection_enabled {
            self.detect_rois(&image)
        } else {
            Vec::new()
        };
        let composite: Frame = Arc::new(self.compose(image, &observations));

        let mut report = StepReport::default();
        if self.detection_enabled {
            for (roi_index, presence) in &observations {
                // 检测失败的ROI本帧跳过, 不当作无人
                let Some(presence) = presence else { continue };
                let transition =
                    self.tracker
                        .observe(*roi_index, presence.detected, presence.confidence, tick);

                if transition.is_active() {
                    self.tracker.capture(*roi_index, Arc::clone(&composite));
                }
                if let Transition::Fire(_) = transition {
                    report.alerts.push(self.fire(*roi_index));
                }
                if let Some(event) = transition.event() {
                    self.log_event(event);
                    report.events.push(event.clone());
                }
            }
            self.board
                .publish_status(StatusSnapshot::running(&self.tracker.status(tick.instant)));
        } else {
            self.board.publish_status(StatusSnapshot::detection_off());
        }

        self.board.publish_frame(Arc::clone(&composite));
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write(&composite) {
                warn!("⚠️ 录制失败: {}", e);
            }
        }

        Ok(report)
    }

    /// 按注册顺序检测每个ROI; 检测失败时该ROI为 None
    fn detect_rois(&mut self, image: &RgbImage) -> Vec<(usize, Option<PersonPresence>)> {
        let mut observations = Vec::with_capacity(self.rois.len());
        for roi in self.rois.iter() {
            let Some((area, crop)) = roi.crop(image) else {
                // 区域完全在画面外, 视为无人
                debug!("{} 超出画面范围", roi.label());
                observations.push((roi.index, Some(PersonPresence::default())));
                continue;
            };

            let presence = match self.detector.detect(&crop) {
                Ok(detections) => {
                    let mut presence = reduce_person(&detections, self.conf_threshold);
                    presence.boxes = presence
                        .boxes
                        .iter()
                        .map(|b| b.offset(area.x as f32, area.y as f32))
                        .collect();
                    Some(presence)
                }
                Err(e) => {
                    warn!("⚠️ {} 检测失败: {}", roi.label(), e);
                    None
                }
            };
            observations.push((roi.index, presence));
        }
        observations
    }

    /// 叠加ROI边框与人形框
    fn compose(
        &self,
        mut canvas: RgbImage,
        observations: &[(usize, Option<PersonPresence>)],
    ) -> RgbImage {
        let (w, h) = canvas.dimensions();
        for roi in self.rois.iter() {
            if let Some(area) = roi.rect.clamp_to(w, h) {
                self.annotator.draw_roi(&mut canvas, area, &roi.label());
            }
        }
        for presence in observations.iter().filter_map(|(_, p)| p.as_ref()) {
            for bbox in &presence.boxes {
                self.annotator.draw_person(&mut canvas, bbox);
            }
        }
        canvas
    }

    fn fire(&self, roi_index: usize) -> AlertDispatch {
        warn!("🚨 {} 停留超时, 触发告警", roi_label(roi_index));
        let audio = self.notifier.notify_audio();
        let email = self
            .notifier
            .notify_email(roi_index, self.tracker.evidence(roi_index));
        AlertDispatch {
            roi_index,
            audio,
            email,
        }
    }

    fn log_event(&mut self, event: &DetectionEvent) {
        info!(
            "📝 {} {} {}",
            event.roi_label(),
            event.kind,
            event
                .confidence
                .map(|c| format!("{:.2}", c))
                .unwrap_or_default()
        );
        if let Err(e) = self.events.append(event) {
            warn!("⚠️ 事件日志写入失败: {}", e);
        }
    }

    /// 循环直到 running 被清除或输入源结束, 返回自身以便恢复运行
    pub fn run(mut self, running: Arc<AtomicBool>) -> Self {
        info!(
            "🔍 检测循环启动 ({}个ROI, {})",
            self.rois.len(),
            self.detector.summary()
        );
        self.board.set_state(LoopState::Running);

        while running.load(Ordering::Relaxed) {
            self.apply_controls();

            if let Err(e) = self.step() {
                match e {
                    SentinelError::SourceExhausted => info!("📹 视频流已结束"),
                    e => error!("❌ 读取帧失败, 检测循环停止: {}", e),
                }
                running.store(false, Ordering::Relaxed);
                self.release_source();
                self.tracker.clear();
                self.board.publish_status(StatusSnapshot::stopped());
                break;
            }

            thread::sleep(self.frame_delay);
        }

        info!("🛑 检测循环退出 (共{}帧)", self.frames);
        self
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::EmailConfig;
    use crate::notify::testing::{complete_email, RecordingAudio, RecordingMailer};
    use crate::occupancy::EventKind;
    use crate::roi::Rect;
    use crossbeam_channel::unbounded;

    struct Rig {
        detection: DetectionLoop,
        log: MemoryLog,
        board: Arc<StatusBoard>,
        audio: Arc<RecordingAudio>,
        mailer: Arc<RecordingMailer>,
        control: crossbeam_channel::Sender<ControlMessage>,
    }

    fn rig(detector: impl Detector + 'static, frames: usize, email: EmailConfig) -> Rig {
        let audio = Arc::new(RecordingAudio::default());
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Arc::new(Notifier::new(
            audio.clone(),
            "voice.mp3",
            mailer.clone(),
            email,
            8,
        ));
        let log = MemoryLog::default();
        let board = Arc::new(StatusBoard::new());
        let (tx, rx) = unbounded();

        let mut detection = DetectionLoop::new(
            Box::new(detector),
            notifier,
            Box::new(log.clone()),
            board.clone(),
            rx,
        )
        .with_clock(Box::new(SteppingClock::new(Duration::from_secs(1))));
        detection.rois_mut().add(Rect::new(0, 0, 32, 32)).unwrap();
        detection.attach_source(Box::new(ScriptedSource::new(frames)));

        Rig {
            detection,
            log,
            board,
            audio,
            mailer,
            control: tx,
        }
    }

    fn kinds(log: &MemoryLog) -> Vec<EventKind> {
        log.events.lock().iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_alert_fires_once_after_wait_time() {
        let mut rig = rig(ScriptedDetector::always(0.9, 15), 15, complete_email());

        let mut alerts_at = Vec::new();
        for t in 0..15 {
            let report = rig.detection.step().unwrap();
            if !report.alerts.is_empty() {
                alerts_at.push(t);
            }
            match t {
                1 => assert_eq!(rig.board.status().text(), "ROI 1: Alert in 9s"),
                10 => assert_eq!(rig.board.status().text(), "ROI 1: Alert!"),
                _ => {}
            }
        }

        assert_eq!(alerts_at, vec![10]);
        assert_eq!(kinds(&rig.log), vec![EventKind::Entered, EventKind::AlertTriggered]);
        let events = rig.log.events.lock();
        assert_eq!(events[0].confidence, Some(0.9));
    }

    #[test]
    fn test_absence_restarts_dwell_timer() {
        // t=0..4 有人, t=5 离开, t=6.. 有人
        let mut script: Vec<Option<f32>> = vec![Some(0.8); 5];
        script.push(None);
        script.extend(vec![Some(0.8); 9]);
        let mut rig = rig(ScriptedDetector::new(script), 15, complete_email());

        for _ in 0..15 {
            let report = rig.detection.step().unwrap();
            assert!(report.alerts.is_empty());
        }
        assert_eq!(
            kinds(&rig.log),
            vec![EventKind::Entered, EventKind::Left, EventKind::Entered]
        );
        assert_eq!(rig.log.events.lock()[1].confidence, None);
    }

    #[test]
    fn test_evidence_keeps_first_frames() {
        let mut rig = rig(ScriptedDetector::always(0.9, 6), 6, complete_email());
        rig.detection.tracker_mut().set_wait_time_secs(5.0).unwrap();
        rig.detection.tracker_mut().set_evidence_frames(4).unwrap();

        let mut published = Vec::new();
        for _ in 0..6 {
            rig.detection.step().unwrap();
            published.push(rig.board.latest_frame().unwrap());
        }

        let evidence = rig.detection.tracker().evidence(0);
        assert_eq!(evidence.len(), 4);
        for (captured, shown) in evidence.iter().zip(&published[..4]) {
            assert!(Arc::ptr_eq(captured, shown));
        }
    }

    #[test]
    fn test_default_config_labels_person_boxes() {
        let mut rig = rig(ScriptedDetector::always(0.9, 1), 1, complete_email());
        rig.detection = rig.detection.with_config(&SentinelConfig::default());
        rig.detection.step().unwrap();

        // 人形框 (1,1)-(31,31) 内部的绿色像素来自 "person 0.90" 标签
        let frame = rig.board.latest_frame().unwrap();
        let label = (2..31)
            .flat_map(|y| (2..31).map(move |x| (x, y)))
            .filter(|&(x, y)| *frame.get_pixel(x, y) == image::Rgb([0, 255, 0]))
            .count();
        assert!(label > 20, "label pixels: {}", label);
    }

    #[test]
    fn test_incomplete_email_still_alerts_and_logs() {
        let mut email = complete_email();
        email.sender_password.clear();
        let mut rig = rig(ScriptedDetector::always(0.7, 2), 2, email);
        rig.detection.tracker_mut().set_wait_time_secs(1.0).unwrap();

        rig.detection.step().unwrap();
        let report = rig.detection.step().unwrap();

        assert_eq!(
            report.alerts,
            vec![AlertDispatch {
                roi_index: 0,
                audio: NotifyOutcome::Dispatched,
                email: NotifyOutcome::MissingConfig("sender_password"),
            }]
        );
        assert_eq!(kinds(&rig.log), vec![EventKind::Entered, EventKind::AlertTriggered]);
        assert!(rig.mailer.sent.lock().is_empty());

        // 声音在通知线程中播放
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while *rig.audio.plays.lock() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*rig.audio.plays.lock(), 1);
    }

    #[test]
    fn test_detector_failure_skips_roi() {
        let mut rig = rig(FailingDetector, 3, complete_email());
        for _ in 0..3 {
            let report = rig.detection.step().unwrap();
            assert!(report.events.is_empty());
        }
        assert_eq!(rig.detection.tracker().active_count(), 0);
    }

    #[test]
    fn test_controls_apply_between_frames() {
        let mut rig = rig(ScriptedDetector::always(0.4, 3), 3, complete_email());

        rig.control.send(ControlMessage::SetConfThreshold(1.5)).unwrap();
        rig.control.send(ControlMessage::SetConfThreshold(0.3)).unwrap();
        rig.control.send(ControlMessage::SetWaitTime(-1.0)).unwrap();
        rig.detection.apply_controls();
        assert_eq!(rig.detection.conf_threshold(), 0.3);
        assert_eq!(rig.detection.tracker().wait_time(), Duration::from_secs(10));

        rig.detection.step().unwrap();
        assert!(rig.detection.tracker().is_active(0));

        rig.control.send(ControlMessage::ToggleDetection(false)).unwrap();
        rig.detection.apply_controls();
        assert_eq!(rig.detection.tracker().active_count(), 0);

        let report = rig.detection.step().unwrap();
        assert!(report.events.is_empty());
        assert_eq!(rig.board.status().text(), "Status: Detection stopped");
        assert!(rig.board.latest_frame().is_some());
        assert_eq!(kinds(&rig.log), vec![EventKind::Entered]);
    }

    #[test]
    fn test_run_stops_when_source_exhausted() {
        let rig = rig(ScriptedDetector::always(0.9, 3), 3, complete_email());
        let running = Arc::new(AtomicBool::new(true));

        let detection = rig.detection.run(running.clone());

        assert!(!running.load(Ordering::Relaxed));
        assert!(!detection.has_source());
        assert_eq!(detection.frames_processed(), 3);
        assert_eq!(rig.board.status(), StatusSnapshot::stopped());
        assert_eq!(detection.tracker().active_count(), 0);
    }

    #[test]
    fn test_read_error_stops_loop() {
        let mut rig = rig(ScriptedDetector::always(0.9, 1), 1, complete_email());
        rig.detection.attach_source(Box::new(BrokenSource));
        assert!(matches!(rig.detection.step(), Err(SentinelError::Source(_))));

        let detection = rig.detection.run(Arc::new(AtomicBool::new(true)));
        assert!(!detection.has_source());
        assert_eq!(rig.board.status().state, LoopState::Stopped);
    }
}
