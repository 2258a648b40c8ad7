//! 控制器 (Sentinel)
//!
//! 对外暴露: 启动 / 停止 / 添加ROI / 清空ROI / 检测开关 / 运行参数。
//! 检测循环空闲时由控制器持有, 运行时由检测线程持有并在退出时交还。
//! 修改ROI前先暂停循环 (停止并等待线程退出, 释放输入源), 修改后重新打开输入源继续运行。

use crossbeam_channel::{unbounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use super::detection_loop::{ControlMessage, DetectionLoop};
use super::status::{LoopState, StatusBoard, StatusSnapshot};
use crate::config::{
    validate_conf_threshold, validate_evidence_frames, validate_frame_delay, validate_wait_time,
    EmailConfig, SentinelConfig,
};
use crate::detection::types::Frame;
use crate::detection::Detector;
use crate::error::{ConfigError, Result, SentinelError, SourceError};
use crate::event_log::EventSink;
use crate::input::FrameSource;
use crate::notify::Notifier;
use crate::roi::{Rect, Roi};

/// 打开 (或重新打开) 输入源
pub type SourceOpener =
    Box<dyn FnMut() -> std::result::Result<Box<dyn FrameSource>, SourceError> + Send>;

struct Worker {
    handle: JoinHandle<DetectionLoop>,
    running: Arc<AtomicBool>,
}

pub struct Sentinel {
    idle: Option<DetectionLoop>,
    worker: Option<Worker>,
    opener: SourceOpener,
    control: Sender<ControlMessage>,
    board: Arc<StatusBoard>,
    notifier: Arc<Notifier>,
    rois: Vec<Roi>,
}

impl Sentinel {
    /// 按配置创建 (参数与ROI均先校验)
    pub fn new(
        detector: Box<dyn Detector>,
        notifier: Arc<Notifier>,
        events: Box<dyn EventSink>,
        opener: SourceOpener,
        config: &SentinelConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (control, control_rx) = unbounded();
        let board = Arc::new(StatusBoard::new());
        let mut detection = DetectionLoop::new(
            detector,
            Arc::clone(&notifier),
            events,
            Arc::clone(&board),
            control_rx,
        )
        .with_config(config);

        let mut rois = Vec::with_capacity(config.rois.len());
        for &rect in &config.rois {
            rois.push(detection.rois_mut().add(Rect::from(rect))?);
        }

        Ok(Self {
            idle: Some(detection),
            worker: None,
            opener,
            control,
            board,
            notifier,
            rois,
        })
    }

    /// 在启动前调整检测循环 (录制、标注字体、时钟等); 运行中调用无效
    pub fn configure(mut self, f: impl FnOnce(DetectionLoop) -> DetectionLoop) -> Self {
        if let Some(detection) = self.idle.take() {
            self.idle = Some(f(detection));
        } else {
            warn!("⚠️ 检测循环运行中, 忽略配置修改");
        }
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| w.running.load(Ordering::Relaxed) && !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// 打开输入源并启动检测线程
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(SentinelError::AlreadyRunning);
        }
        let (mut detection, _) = self.take_loop()?;

        if !detection.has_source() {
            match (self.opener)() {
                Ok(source) => detection.attach_source(source),
                Err(e) => {
                    error!("❌ 输入源打开失败: {}", e);
                    self.idle = Some(detection);
                    self.board.publish_status(StatusSnapshot::stopped());
                    return Err(e.into());
                }
            }
        }
        self.spawn(detection)
    }

    /// 停止检测并释放输入源; 已派发的通知线程继续执行
    pub fn stop(&mut self) -> Result<()> {
        let (mut detection, was_running) = self.take_loop()?;
        detection.release_source();
        detection.tracker_mut().clear();
        self.idle = Some(detection);
        self.board.publish_status(StatusSnapshot::stopped());
        if was_running {
            info!("🛑 检测已停止");
        }
        Ok(())
    }

    /// 添加ROI: 暂停 → 修改 → 恢复
    ///
    /// 宽或高为0时拒绝, 注册表不变, 循环照常恢复。
    pub fn add_roi(&mut self, rect: Rect) -> Result<Roi> {
        let added = self.with_paused(|detection| detection.rois_mut().add(rect))?;
        match added {
            Ok(roi) => {
                info!("✅ 添加 {}: {:?}", roi.label(), roi.rect);
                self.rois.push(roi);
                Ok(roi)
            }
            Err(e) => {
                warn!("⚠️ {}", e);
                Err(e.into())
            }
        }
    }

    /// 清空全部ROI及其占用状态、证据帧
    pub fn clear_rois(&mut self) -> Result<()> {
        self.with_paused(|detection| {
            detection.rois_mut().clear();
            detection.tracker_mut().clear();
        })?;
        self.rois.clear();
        info!("🧹 已清空全部ROI");
        Ok(())
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    /// 关闭时画面照常刷新, 所有占用状态被丢弃
    pub fn set_detection_enabled(&mut self, enabled: bool) {
        self.send(ControlMessage::ToggleDetection(enabled));
    }

    pub fn set_wait_time(&mut self, secs: f64) -> std::result::Result<(), ConfigError> {
        validate_wait_time(secs)?;
        self.send(ControlMessage::SetWaitTime(secs));
        Ok(())
    }

    pub fn set_conf_threshold(&mut self, conf: f32) -> std::result::Result<(), ConfigError> {
        let conf = validate_conf_threshold(conf)?;
        self.send(ControlMessage::SetConfThreshold(conf));
        Ok(())
    }

    pub fn set_evidence_frames(&mut self, count: usize) -> std::result::Result<(), ConfigError> {
        let count = validate_evidence_frames(count)?;
        self.send(ControlMessage::SetEvidenceFrames(count));
        Ok(())
    }

    pub fn set_frame_delay(&mut self, secs: f64) -> std::result::Result<(), ConfigError> {
        let delay = validate_frame_delay(secs)?;
        self.send(ControlMessage::SetFrameDelay(delay));
        Ok(())
    }

    pub fn set_email_config(&self, config: EmailConfig) {
        self.notifier.set_email_config(config);
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn status(&self) -> StatusSnapshot {
        self.board.status()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.board.latest_frame()
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    /// 运行中的循环在下一帧前处理; 空闲时立即生效
    fn send(&mut self, msg: ControlMessage) {
        // 接收端由检测循环持有, 与控制器同生命周期
        let _ = self.control.send(msg);
        if let Some(detection) = self.idle.as_mut() {
            detection.apply_controls();
        }
    }

    fn with_paused<T>(&mut self, f: impl FnOnce(&mut DetectionLoop) -> T) -> Result<T> {
        let (mut detection, was_running) = self.take_loop()?;
        if was_running {
            detection.release_source();
            self.board.set_state(LoopState::Paused);
            info!("⏸️ 检测已暂停");
        }

        let out = f(&mut detection);
        self.idle = Some(detection);

        // 恢复失败时循环保持停止, 状态栏显示已停止
        if was_running {
            if let Err(e) = self.start() {
                error!("❌ 恢复检测失败: {}", e);
            }
        }
        Ok(out)
    }

    /// 取回检测循环: 运行中则通知退出并等待线程结束
    fn take_loop(&mut self) -> Result<(DetectionLoop, bool)> {
        if let Some(worker) = self.worker.take() {
            let was_running = worker.running.swap(false, Ordering::Relaxed);
            let detection = worker.handle.join().map_err(|_| {
                error!("❌ 检测线程异常退出");
                SentinelError::LoopPanicked
            })?;
            return Ok((detection, was_running));
        }
        self.idle
            .take()
            .map(|detection| (detection, false))
            .ok_or(SentinelError::LoopPanicked)
    }

    fn spawn(&mut self, detection: DetectionLoop) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("detection-loop".to_string())
            .spawn(move || detection.run(flag))
            .map_err(SentinelError::Spawn)?;
        self.worker = Some(Worker { handle, running });
        Ok(())
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.running.store(false, Ordering::Relaxed);
            if let Ok(mut detection) = worker.handle.join() {
                detection.release_source();
            }
        }
    }
}
