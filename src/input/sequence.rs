//! 图片目录回放 - 按文件名顺序逐帧读取
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::FrameSource;
use crate::error::SourceError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref().to_path_buf();
        let entries = fs::read_dir(&dir)
            .map_err(|e| SourceError::Open(format!("{}: {}", dir.display(), e)))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        info!("🎞️ 图片序列: {} ({}帧)", dir.display(), files.len());
        Ok(Self {
            dir,
            files,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let image = image::open(path)
            .map_err(|e| SourceError::Read(format!("{}: {}", path.display(), e)))?;
        Ok(Some(image.to_rgb8()))
    }

    fn release(&mut self) {
        self.cursor = self.files.len();
    }

    fn describe(&self) -> String {
        format!("images:{}", self.dir.display())
    }
}
