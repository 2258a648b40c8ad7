/// 告警通知 (Notifier)
///
/// 检测循环只负责派发, 声音和邮件都在独立线程中执行:
/// - Dispatcher: 每告警一个线程, 在途数量有上限
/// - Audio:      本地告警音
/// - Email:      正文 + 证据帧附件
///
/// 传输失败只会被记录和上报, 不会传回检测循环。
pub mod audio;
pub mod dispatcher;
pub mod email;

use chrono::Local;
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use audio::{AudioPlayer, CommandPlayer};
pub use dispatcher::Dispatcher;
pub use email::{AlertEmail, MailTransport, SmtpMailer};

#[cfg(feature = "audio")]
pub use audio::RodioPlayer;

use crate::config::EmailConfig;
use crate::detection::types::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Audio,
    Email,
}

/// 派发结果 (不代表发送成功, 发送结果见 NotifyReport)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Dispatched,
    /// 邮件配置不完整, 附带缺失字段
    MissingConfig(&'static str),
    /// 没有证据帧, 邮件不发送
    NoEvidence,
    /// 在途任务已达上限
    Throttled,
}

/// 通知线程完成后的上报
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyReport {
    pub channel: Channel,
    pub roi_index: Option<usize>,
    pub result: Result<(), String>,
}

pub struct Notifier {
    audio: Arc<dyn AudioPlayer>,
    sound: PathBuf,
    mailer: Arc<dyn MailTransport>,
    email: RwLock<EmailConfig>,
    dispatcher: Dispatcher,
    reports: Option<Sender<NotifyReport>>,
}

impl Notifier {
    pub fn new(
        audio: Arc<dyn AudioPlayer>,
        sound: impl Into<PathBuf>,
        mailer: Arc<dyn MailTransport>,
        email: EmailConfig,
        max_in_flight: usize,
    ) -> Self {
        Self {
            audio,
            sound: sound.into(),
            mailer,
            email: RwLock::new(email),
            dispatcher: Dispatcher::new(max_in_flight),
            reports: None,
        }
    }

    /// 通知线程的结果发送到该通道 (界面可用来提示失败)
    pub fn with_reports(mut self, tx: Sender<NotifyReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn set_email_config(&self, config: EmailConfig) {
        *self.email.write() = config;
        info!("✅ 邮件配置已保存");
    }

    pub fn email_config(&self) -> EmailConfig {
        self.email.read().clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// 播放告警音 (不阻塞调用方)
    pub fn notify_audio(&self) -> NotifyOutcome {
        let audio = Arc::clone(&self.audio);
        let sound = self.sound.clone();
        let reports = self.reports.clone();

        let spawned = self.dispatcher.spawn("alert-audio", move || {
            let result = audio.play(&sound).map_err(|e| {
                warn!("⚠️ 告警音播放失败: {}", e);
                e.to_string()
            });
            report(&reports, Channel::Audio, None, result);
        });

        if spawned {
            NotifyOutcome::Dispatched
        } else {
            NotifyOutcome::Throttled
        }
    }

    /// 发送带证据帧的告警邮件 (不阻塞调用方)
    pub fn notify_email(&self, roi_index: usize, frames: Vec<Frame>) -> NotifyOutcome {
        let config = self.email_config();
        if let Some(field) = config.missing_field() {
            warn!("⚠️ 请先完成邮件配置 (缺少 {}), 跳过邮件告警", field);
            return NotifyOutcome::MissingConfig(field);
        }
        if frames.is_empty() {
            warn!("⚠️ ROI {} 没有证据帧, 跳过邮件告警", roi_index + 1);
            return NotifyOutcome::NoEvidence;
        }

        let at = Local::now();
        let mailer = Arc::clone(&self.mailer);
        let reports = self.reports.clone();

        let spawned = self.dispatcher.spawn("alert-email", move || {
            let result = AlertEmail::compose(roi_index, at, &frames)
                .and_then(|email| mailer.send(&config, &email));
            let result = match result {
                Ok(()) => {
                    info!("📧 告警邮件已发送: ROI {} ({}帧)", roi_index + 1, frames.len());
                    Ok(())
                }
                Err(e) => {
                    error!("❌ 邮件发送失败: {}", e);
                    Err(e.to_string())
                }
            };
            report(&reports, Channel::Email, Some(roi_index), result);
        });

        if spawned {
            NotifyOutcome::Dispatched
        } else {
            NotifyOutcome::Throttled
        }
    }
}

fn report(
    reports: &Option<Sender<NotifyReport>>,
    channel: Channel,
    roi_index: Option<usize>,
    result: Result<(), String>,
) {
    if let Some(tx) = reports {
        // 接收方可能已退出
        let _ = tx.send(NotifyReport {
            channel,
            roi_index,
            result,
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试替身: 记录调用而不真正发送
    use super::*;
    use crate::error::NotifyError;
    use parking_lot::Mutex;
    use std::path::Path;

    #[derive(Default)]
    pub struct RecordingAudio {
        pub plays: Mutex<usize>,
    }

    impl AudioPlayer for RecordingAudio {
        fn play(&self, _sound: &Path) -> Result<(), NotifyError> {
            *self.plays.lock() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<AlertEmail>>,
        pub fail: bool,
    }

    impl MailTransport for RecordingMailer {
        fn send(&self, _config: &EmailConfig, email: &AlertEmail) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Transport("535 authentication failed".into()));
            }
            self.sent.lock().push(email.clone());
            Ok(())
        }
    }

    pub fn complete_email() -> EmailConfig {
        EmailConfig {
            sender_email: "sentinel@example.com".into(),
            sender_password: "app-password".into(),
            recipient_email: "guard@example.com".into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crossbeam_channel::unbounded;
    use image::RgbImage;
    use std::time::Duration;

    fn frames(n: usize) -> Vec<Frame> {
        (0..n).map(|_| Arc::new(RgbImage::new(8, 8))).collect()
    }

    #[test]
    fn test_incomplete_config_is_noop() {
        let audio = Arc::new(RecordingAudio::default());
        let mailer = Arc::new(RecordingMailer::default());
        let mut email = complete_email();
        email.sender_password.clear();

        let notifier = Notifier::new(audio.clone(), "voice.mp3", mailer.clone(), email, 4);
        assert_eq!(
            notifier.notify_email(0, frames(2)),
            NotifyOutcome::MissingConfig("sender_password")
        );
        assert_eq!(notifier.dispatcher().in_flight(), 0);

        // 声音告警不受影响
        let (tx, rx) = unbounded();
        let notifier = notifier.with_reports(tx);
        assert_eq!(notifier.notify_audio(), NotifyOutcome::Dispatched);
        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.channel, Channel::Audio);
        assert_eq!(*audio.plays.lock(), 1);
        assert!(mailer.sent.lock().is_empty());
    }

    #[test]
    fn test_email_sent_with_evidence() {
        let mailer = Arc::new(RecordingMailer::default());
        let (tx, rx) = unbounded();
        let notifier = Notifier::new(
            Arc::new(RecordingAudio::default()),
            "voice.mp3",
            mailer.clone(),
            complete_email(),
            4,
        )
        .with_reports(tx);

        assert_eq!(notifier.notify_email(1, frames(0)), NotifyOutcome::NoEvidence);
        assert_eq!(notifier.notify_email(1, frames(4)), NotifyOutcome::Dispatched);

        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.roi_index, Some(1));
        assert!(report.result.is_ok());
        let sent = mailer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachments.len(), 4);
        assert_eq!(sent[0].subject, "Alert: Person Detected in ROI 2");
    }

    #[test]
    fn test_transport_failure_is_reported() {
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let (tx, rx) = unbounded();
        let notifier = Notifier::new(
            Arc::new(RecordingAudio::default()),
            "voice.mp3",
            mailer,
            complete_email(),
            4,
        )
        .with_reports(tx);

        assert_eq!(notifier.notify_email(0, frames(1)), NotifyOutcome::Dispatched);
        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.channel, Channel::Email);
        assert!(report.result.unwrap_err().contains("535"));
    }
}
