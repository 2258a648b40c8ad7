//! 监控配置 - 通过JSON文件调整参数

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::ConfigError;

/// 默认停留时间 (秒)
pub const DEFAULT_WAIT_TIME_SECS: f64 = 10.0;
/// 默认置信度阈值
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
/// 每次告警附带的证据帧数
pub const DEFAULT_EVIDENCE_FRAMES: usize = 4;
/// 检测循环每轮之间的让出时间
pub const DEFAULT_FRAME_DELAY_MS: u64 = 30;
/// 标签字体; 文件不存在时使用内置点阵字形
pub const DEFAULT_LABEL_FONT: &str = "assets/font/DejaVuSans.ttf";

/// 邮件发送配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub recipient_email: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            sender_email: String::new(),
            sender_password: String::new(),
            recipient_email: String::new(),
        }
    }
}

impl EmailConfig {
    /// 第一个为空的必填字段
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.smtp_server.trim().is_empty() {
            Some("smtp_server")
        } else if self.sender_email.trim().is_empty() {
            Some("sender_email")
        } else if self.sender_password.is_empty() {
            Some("sender_password")
        } else if self.recipient_email.trim().is_empty() {
            Some("recipient_email")
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_field().is_none()
    }
}

/// 监控系统参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    // === 停留检测 ===
    pub wait_time_secs: f64,  // 停留多久触发告警
    pub conf_threshold: f32,  // 人形置信度阈值
    pub evidence_frames: usize, // 每个占用区间保留的证据帧
    pub frame_delay_ms: u64,  // 循环让出时间

    // === 告警 ===
    pub max_inflight_notifications: usize,
    pub alert_sound: String,
    pub audio_player: Vec<String>, // 外部播放器命令, 声音文件作为最后一个参数
    pub email: EmailConfig,

    // === 输出 ===
    pub event_log: String,
    pub record_dir: Option<String>,
    pub label_font: Option<String>,

    // === ROI [x, y, w, h] ===
    pub rois: Vec<[u32; 4]>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: DEFAULT_WAIT_TIME_SECS,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            evidence_frames: DEFAULT_EVIDENCE_FRAMES,
            frame_delay_ms: DEFAULT_FRAME_DELAY_MS,

            max_inflight_notifications: 8,
            alert_sound: "voice.mp3".to_string(),
            audio_player: default_audio_player()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            email: EmailConfig::default(),

            event_log: "detection_log.csv".to_string(),
            record_dir: None,
            label_font: Some(DEFAULT_LABEL_FONT.to_string()),

            rois: Vec::new(),
        }
    }
}

fn default_audio_player() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &["afplay"]
    } else if cfg!(target_os = "linux") {
        &["aplay", "-q"]
    } else {
        &["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet"]
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置 (不存在则写入默认配置)
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 校验全部可调参数
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_wait_time(self.wait_time_secs)?;
        validate_conf_threshold(self.conf_threshold)?;
        validate_evidence_frames(self.evidence_frames)?;
        validate_frame_delay(self.frame_delay_ms as f64 / 1000.0)?;
        Ok(())
    }

    /// 非法值回落到默认停留时间
    pub fn wait_time(&self) -> Duration {
        validate_wait_time(self.wait_time_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_WAIT_TIME_SECS))
    }

    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }
}

pub fn validate_wait_time(secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidWaitTime(secs))
}

pub fn validate_conf_threshold(conf: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&conf) {
        Ok(conf)
    } else {
        Err(ConfigError::InvalidConfThreshold(conf))
    }
}

pub fn validate_evidence_frames(count: usize) -> Result<usize, ConfigError> {
    if count > 0 {
        Ok(count)
    } else {
        Err(ConfigError::InvalidEvidenceFrames(count))
    }
}

pub fn validate_frame_delay(secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidFrameDelay(secs))
}
