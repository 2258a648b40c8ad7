//! 摄像头 / RTSP / 视频文件输入
//!
//! 解码在独立线程中运行, 解码出的帧经有界通道交给检测循环,
//! 读取时只保留最新一帧。
//! 本地摄像头支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use super::decode_filter::RgbFrameFilter;
use super::{DecodeWorker, FrameSource};
use crate::error::SourceError;

/// 等待首帧/下一帧的超时
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// 解码线程与检测循环之间的缓冲帧数
const FRAME_QUEUE: usize = 2;
/// 释放时等待解码线程退出的上限
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);
/// 解码线程检查停止标志的间隔
const STOP_POLL: Duration = Duration::from_millis(20);

/// 输入源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// 本地摄像头 (设备索引)
    Camera(usize),
    Rtsp(String),
    File(String),
}

impl FromStr for InputSource {
    type Err = SourceError;

    /// `0` / `camera:0` → 摄像头, `rtsp://...` → RTSP, 其余视为文件路径
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SourceError::Open("输入源为空".to_string()));
        }
        let index = s.strip_prefix("camera:").unwrap_or(s);
        if let Ok(index) = index.parse::<usize>() {
            return Ok(InputSource::Camera(index));
        }
        if s.starts_with("rtsp://") || s.starts_with("rtsps://") {
            return Ok(InputSource::Rtsp(s.to_string()));
        }
        Ok(InputSource::File(s.to_string()))
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Camera(index) => write!(f, "camera:{}", index),
            InputSource::Rtsp(url) => write!(f, "{}", url),
            InputSource::File(path) => write!(f, "{}", path),
        }
    }
}

/// 获取可用的摄像头设备列表
pub fn camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}

/// 格式化摄像头URL - 根据平台选择
fn camera_url(index: usize) -> Result<String, SourceError> {
    #[cfg(target_os = "windows")]
    {
        let devices = camera_devices();
        devices
            .into_iter()
            .find(|(i, _)| *i == index)
            .map(|(_, name)| format!("video={}", name))
            .ok_or_else(|| SourceError::Open(format!("未找到摄像头 #{}", index)))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(format!("/dev/video{}", index))
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        Ok(format!("{}", index))
    }
}

fn camera_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow"
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "v4l2"
    }
}

fn build_input(source: &InputSource) -> Result<Input, SourceError> {
    let input = match source {
        InputSource::Camera(index) => {
            Input::new(camera_url(*index)?).set_format(camera_format())
        }
        InputSource::Rtsp(url) => Input::new(url.as_str()).set_input_opts(
            [
                ("rtsp_transport", "tcp"),
                ("buffer_size", "67108864"),
                ("rtsp_flags", "prefer_tcp"),
            ]
            .into(),
        ),
        InputSource::File(path) => Input::new(path.as_str()),
    };
    Ok(input)
}

/// FFmpeg 帧来源
pub struct FfmpegSource {
    source: InputSource,
    rx: Receiver<RgbImage>,
    worker: DecodeWorker,
}

impl FfmpegSource {
    /// 打开输入源并启动解码线程; 打开失败时立即返回错误
    pub fn open(source: InputSource) -> Result<Self, SourceError> {
        info!("🎬 打开输入源: {}", source);

        let (tx, rx) = bounded::<RgbImage>(FRAME_QUEUE);
        let (ready_tx, ready_rx) = bounded::<Result<(), SourceError>>(1);
        let thread_source = source.clone();

        let mut worker = DecodeWorker::spawn("ffmpeg-decode", move |stop| {
            let filter = RgbFrameFilter::new(tx, Arc::clone(&stop));
            let started = build_input(&thread_source).and_then(|input| {
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("decode", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                FfmpegContext::builder()
                    .input(input)
                    .filter_descs(["format=yuv420p"].into())
                    .output(out)
                    .build()
                    .map_err(|e| SourceError::Open(format!("构建失败: {}", e)))?
                    .start()
                    .map_err(|e| SourceError::Open(format!("启动失败: {}", e)))
            });

            let sch = match started {
                Ok(sch) => sch,
                Err(e) => {
                    error!("❌ 输入源打开失败: {}", e);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            info!("✅ 解码启动成功: {}", thread_source);

            // 无新帧时过滤器不会被调用, 由这里检查停止标志并中止调度
            while !sch.is_ended() {
                if stop.load(Ordering::Relaxed) {
                    sch.abort();
                    break;
                }
                thread::sleep(STOP_POLL);
            }
            if let Err(e) = sch.wait() {
                warn!("⚠️ 解码结束: {}", e);
            }
        })
        .map_err(|e| SourceError::Open(e.to_string()))?;

        match ready_rx.recv_timeout(READ_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { source, rx, worker }),
            Ok(Err(e)) => {
                worker.stop_and_join(RELEASE_TIMEOUT);
                Err(e)
            }
            Err(_) => {
                worker.stop_and_join(RELEASE_TIMEOUT);
                Err(SourceError::Open(format!("{}: 打开超时", source)))
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
        match self.rx.recv_timeout(READ_TIMEOUT) {
            // 只保留最新一帧
            Ok(frame) => Ok(Some(self.rx.try_iter().last().unwrap_or(frame))),
            Err(RecvTimeoutError::Timeout) => Err(SourceError::Read(format!(
                "{}: {}秒内没有新帧",
                self.source,
                READ_TIMEOUT.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    /// 停止解码并等待设备关闭, 之后可立即重新打开同一设备
    fn release(&mut self) {
        let stop = self.worker.stop_flag();
        if stop.load(Ordering::Relaxed) {
            return;
        }
        info!("📹 释放输入源: {}", self.source);
        if !self.worker.stop_and_join(RELEASE_TIMEOUT) {
            warn!("⚠️ 解码线程未及时退出: {}", self.source);
        }
    }

    fn describe(&self) -> String {
        self.source.to_string()
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_source() {
        assert_eq!("0".parse::<InputSource>().unwrap(), InputSource::Camera(0));
        assert_eq!("camera:2".parse::<InputSource>().unwrap(), InputSource::Camera(2));
        assert_eq!(
            "rtsp://10.0.0.5/live".parse::<InputSource>().unwrap(),
            InputSource::Rtsp("rtsp://10.0.0.5/live".into())
        );
        assert_eq!(
            "lobby.mp4".parse::<InputSource>().unwrap(),
            InputSource::File("lobby.mp4".into())
        );
        assert!("  ".parse::<InputSource>().is_err());
    }
}
