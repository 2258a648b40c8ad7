/// 视频输入系统 (Video Input System)
///
/// 检测循环按需拉取帧, 读取失败或流结束时循环停止
/// - Sequence: 图片目录回放 (离线复现 / 测试)
/// - Stream:   本地摄像头 / RTSP (feature = "ffmpeg")
/// - Filter:   FFmpeg帧过滤与 YUV420P → RGB 转换
/// - Worker:   解码线程的停止与等待
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
pub mod sequence;
#[cfg(feature = "ffmpeg")]
pub mod stream;
pub mod worker;

use image::RgbImage;

use crate::error::SourceError;

pub use sequence::ImageSequenceSource;
pub use worker::DecodeWorker;
#[cfg(feature = "ffmpeg")]
pub use stream::{FfmpegSource, InputSource};

/// 帧来源
pub trait FrameSource: Send {
    /// 下一帧; `Ok(None)` 表示流已结束
    fn read(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// 释放设备 (停止后调用, 可重复调用); 返回时设备已关闭
    fn release(&mut self) {}

    fn describe(&self) -> String;
}
