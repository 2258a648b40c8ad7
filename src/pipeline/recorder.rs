//! 录制: 将标注后的画面写成编号的JPEG序列
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::detection::types::Frame;
use crate::notify::email::encode_jpeg;

pub trait FrameSink: Send {
    fn write(&mut self, frame: &Frame) -> io::Result<()>;
}

pub struct JpegSequenceRecorder {
    dir: PathBuf,
    next: u64,
}

impl JpegSequenceRecorder {
    pub fn create(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("🎥 录制目录: {}", dir.display());
        Ok(Self { dir, next: 0 })
    }

    pub fn frames_written(&self) -> u64 {
        self.next
    }
}

impl FrameSink for JpegSequenceRecorder {
    fn write(&mut self, frame: &Frame) -> io::Result<()> {
        let data = encode_jpeg(frame).map_err(io::Error::other)?;
        let path = self.dir.join(format!("frame_{:06}.jpg", self.next));
        fs::write(path, data)?;
        self.next += 1;
        Ok(())
    }
}
