//! 声音告警
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::NotifyError;

/// 播放本地告警音 (在通知线程中调用, 可阻塞到播放结束)
pub trait AudioPlayer: Send + Sync {
    fn play(&self, sound: &Path) -> Result<(), NotifyError>;
}

/// 调用外部播放器, 声音文件作为最后一个参数
#[derive(Clone, Debug)]
pub struct CommandPlayer {
    argv: Vec<String>,
}

impl CommandPlayer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl AudioPlayer for CommandPlayer {
    fn play(&self, sound: &Path) -> Result<(), NotifyError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| NotifyError::Audio("未配置播放器".to_string()))?;

        let status = Command::new(program)
            .args(args)
            .arg(sound)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| NotifyError::Audio(format!("{}: {}", program, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(NotifyError::Audio(format!("{} 退出码 {}", program, status)))
        }
    }
}

/// 进程内播放 (rodio)
#[cfg(feature = "audio")]
#[derive(Clone, Copy, Debug, Default)]
pub struct RodioPlayer;

#[cfg(feature = "audio")]
impl AudioPlayer for RodioPlayer {
    fn play(&self, sound: &Path) -> Result<(), NotifyError> {
        use std::fs::File;
        use std::io::BufReader;

        let audio_err = |e: &dyn std::fmt::Display| NotifyError::Audio(e.to_string());

        let (_stream, handle) = rodio::OutputStream::try_default().map_err(|e| audio_err(&e))?;
        let sink = rodio::Sink::try_new(&handle).map_err(|e| audio_err(&e))?;
        let file = File::open(sound).map_err(|e| audio_err(&e))?;
        let source = rodio::Decoder::new(BufReader::new(file)).map_err(|e| audio_err(&e))?;
        sink.append(source);
        sink.sleep_until_end();
        Ok(())
    }
}
