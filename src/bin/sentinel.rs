/// 数字卫兵 (Digital Sentinel)
///
/// ROI 停留监控: 有人在框选区域内停留超过设定时间即告警
///
/// 系统架构:
/// 1. 输入线程: 视频解码 (摄像头 / RTSP / 图片目录)
/// 2. 检测线程: 按ROI检测人形, 驱动停留状态机
/// 3. 通知线程: 声音与邮件告警 (每次告警一个, 不阻塞检测)
/// 4. 主线程:   状态输出
use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roi_sentinel::input::{FrameSource, ImageSequenceSource};
use roi_sentinel::notify::{AudioPlayer, SmtpMailer};
use roi_sentinel::pipeline::{JpegSequenceRecorder, SourceOpener};
use roi_sentinel::{
    detection::{Detector, YoloConfig, YoloDetector},
    CsvEventLog, Notifier, Sentinel, SentinelConfig, SourceError,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 数字卫兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "数字卫兵 - ROI 停留监控", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    config: String,

    /// 输入源: 摄像头索引 / rtsp://... / 视频文件 / 图片目录
    #[arg(short, long, default_value = "0")]
    source: String,

    /// 检测模型 (YOLOv8 / YOLO11 ONNX)
    #[arg(short, long, default_value = "models/yolo11n.onnx")]
    model: String,

    /// ROI: x,y,w,h (可重复, 追加到配置文件中的ROI之后)
    #[arg(long = "roi", value_parser = parse_roi)]
    rois: Vec<[u32; 4]>,

    /// 停留多少秒触发告警
    #[arg(long)]
    wait_time: Option<f64>,

    /// 人形置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// 录制标注画面的目录
    #[arg(long)]
    record_dir: Option<String>,
}

fn parse_roi(s: &str) -> std::result::Result<[u32; 4], String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>().map_err(|e| format!("{}: {}", p, e)))
        .collect::<std::result::Result<_, _>>()?;
    <[u32; 4]>::try_from(parts).map_err(|_| format!("ROI 格式应为 x,y,w,h: {}", s))
}

/// 图片目录直接回放, 其余交给 FFmpeg
fn source_opener(input: String) -> SourceOpener {
    Box::new(move || {
        if Path::new(&input).is_dir() {
            return Ok(Box::new(ImageSequenceSource::open(&input)?) as Box<dyn FrameSource>);
        }
        open_stream(&input)
    })
}

#[cfg(feature = "ffmpeg")]
fn open_stream(input: &str) -> std::result::Result<Box<dyn FrameSource>, SourceError> {
    use roi_sentinel::input::{FfmpegSource, InputSource};
    let source: InputSource = input.parse()?;
    Ok(Box::new(FfmpegSource::open(source)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_stream(input: &str) -> std::result::Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::Open(format!(
        "{} (摄像头/RTSP 需要启用 ffmpeg 功能)",
        input
    )))
}

#[cfg(feature = "audio")]
fn audio_player(_config: &SentinelConfig) -> Arc<dyn AudioPlayer> {
    Arc::new(roi_sentinel::notify::RodioPlayer)
}

#[cfg(not(feature = "audio"))]
fn audio_player(config: &SentinelConfig) -> Arc<dyn AudioPlayer> {
    Arc::new(roi_sentinel::notify::CommandPlayer::new(
        config.audio_player.clone(),
    ))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roi_sentinel=info,sentinel=info,ort=warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = SentinelConfig::load(&args.config);
    if let Some(wait_time) = args.wait_time {
        config.wait_time_secs = wait_time;
    }
    if let Some(conf) = args.conf {
        config.conf_threshold = conf;
    }
    if args.record_dir.is_some() {
        config.record_dir = args.record_dir.clone();
    }
    config.rois.extend(args.rois.iter().copied());
    config.validate()?;

    info!("🚀 数字卫兵系统启动");
    info!("📦 检测模型: {}", args.model);
    info!("📹 输入源: {}", args.source);
    info!(
        "⏱️ 停留时间: {}s | 置信度: {} | 证据帧: {}",
        config.wait_time_secs, config.conf_threshold, config.evidence_frames
    );
    if config.rois.is_empty() {
        warn!("⚠️ 未配置ROI, 使用 --roi x,y,w,h 或在配置文件中添加");
    }
    if !config.email.is_complete() {
        warn!("⚠️ 邮件配置不完整, 告警时只播放声音");
    }

    let detector = YoloDetector::new(YoloConfig {
        model: args.model.clone(),
        ..Default::default()
    })?;
    info!("📦 {}", detector.summary());

    let (report_tx, report_rx) = unbounded();
    let notifier = Arc::new(
        Notifier::new(
            audio_player(&config),
            config.alert_sound.clone(),
            Arc::new(SmtpMailer),
            config.email.clone(),
            config.max_inflight_notifications,
        )
        .with_reports(report_tx),
    );

    let events = CsvEventLog::open(&config.event_log)
        .with_context(|| format!("无法打开事件日志: {}", config.event_log))?;

    let recorder = match &config.record_dir {
        Some(dir) => Some(
            JpegSequenceRecorder::create(Path::new(dir).join(roi_sentinel::gen_time_string("-")))
                .with_context(|| format!("无法创建录制目录: {}", dir))?,
        ),
        None => None,
    };

    let mut sentinel = Sentinel::new(
        Box::new(detector),
        notifier,
        Box::new(events),
        source_opener(args.source.clone()),
        &config,
    )?
    .configure(|detection| match recorder {
        Some(recorder) => detection.with_recorder(Box::new(recorder)),
        None => detection,
    });

    if let Err(e) = sentinel.start() {
        bail!("启动失败: {}", e);
    }

    // ========== 主线程: 状态输出 ==========
    let mut last_status = String::new();
    while sentinel.is_running() {
        std::thread::sleep(Duration::from_secs(1));

        let status = sentinel.status().text();
        if status != last_status {
            info!("📊 {}", status);
            last_status = status;
        }
        for report in report_rx.try_iter() {
            if let Err(e) = report.result {
                error!("❌ {:?} 告警失败: {}", report.channel, e);
            }
        }
    }

    info!("📊 {}", sentinel.status().text());
    sentinel.stop()?;
    info!("👋 数字卫兵退出");
    Ok(())
}
