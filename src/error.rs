//! 错误类型 (Error types)
//!
//! 每个模块边界一个枚举; 检测后端和可执行程序使用 anyhow。

use thiserror::Error;

/// 运行参数校验失败, 被拒绝的值不会覆盖旧值
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("停留时间必须是非负数, 收到 {0}")]
    InvalidWaitTime(f64),
    #[error("置信度阈值必须在 0..=1 之间, 收到 {0}")]
    InvalidConfThreshold(f32),
    #[error("证据帧数必须为正整数, 收到 {0}")]
    InvalidEvidenceFrames(usize),
    #[error("帧间隔必须是非负数, 收到 {0}")]
    InvalidFrameDelay(f64),
    #[error("无效ROI: 宽高必须大于0 (w={width}, h={height})")]
    InvalidRoi { width: u32, height: u32 },
}

/// 视频源错误
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("无法打开视频源 {0}")]
    Open(String),
    #[error("读取帧失败: {0}")]
    Read(String),
}

/// 告警通道错误 (只在通知线程内部出现, 不会传播到检测循环)
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("证据帧编码失败: {0}")]
    Encode(#[from] image::ImageError),
    #[error("邮件发送失败: {0}")]
    Transport(String),
    #[error("音频播放失败: {0}")]
    Audio(String),
}

/// 控制器 / 检测循环错误
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("视频流已结束")]
    SourceExhausted,
    #[error("检测线程异常退出")]
    LoopPanicked,
    #[error("检测循环已在运行")]
    AlreadyRunning,
    #[error("无法启动检测线程: {0}")]
    Spawn(std::io::Error),
}

pub type Result<T, E = SentinelError> = std::result::Result<T, E>;
