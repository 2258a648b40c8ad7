use crossbeam_channel::{Sender, TrySendError};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};

/// 最大支持分辨率
const MAX_DIMENSION: u32 = 4096;

/// FFmpeg解码过滤器: YUV420P帧 → RgbImage, 通过通道交给检测循环
#[derive(Clone)]
pub struct RgbFrameFilter {
    tx: Sender<RgbImage>,
    stop: Arc<AtomicBool>,
    count: usize,
    last: Instant,
    dropped_frames: usize,
    total_frames: usize,
}

impl RgbFrameFilter {
    pub fn new(tx: Sender<RgbImage>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            stop,
            count: 0,
            last: Instant::now(),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: std::fmt::Arguments<'_>) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
    }
}

impl FrameFilter for RgbFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 读取方已释放, 结束解码
        if self.stop.load(Ordering::Relaxed) {
            return Err("source released".to_string());
        }

        self.total_frames += 1;

        // SAFETY: 帧指针由 ez_ffmpeg 在回调期间保证有效, 先检查非空
        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame(format_args!("空帧/损坏帧"));
                return Ok(None);
            }

            let raw = &*frame.as_ptr();
            let w = raw.width as u32;
            let h = raw.height as u32;

            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                self.drop_frame(format_args!("非法分辨率 {}x{}", w, h));
                return Ok(None);
            }

            // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
            if raw.decode_error_flags & 0x03 != 0 {
                self.drop_frame(format_args!("解码错误标志=0x{:02x}", raw.decode_error_flags));
                return Ok(None);
            }

            let y_plane = raw.data[0];
            let u_plane = raw.data[1];
            let v_plane = raw.data[2];
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;

            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.drop_frame(format_args!("YUV指针为空"));
                return Ok(None);
            }
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                self.drop_frame(format_args!(
                    "步长异常 y_stride={} uv_stride={}",
                    y_stride, uv_stride
                ));
                return Ok(None);
            }

            let mut buffer = vec![0u8; (w * h * 3) as usize];
            yuv420p_to_rgb(
                y_plane,
                u_plane,
                v_plane,
                y_stride,
                uv_stride,
                &mut buffer,
                w as usize,
                h as usize,
            );

            let Some(image) = RgbImage::from_raw(w, h, buffer) else {
                self.drop_frame(format_args!("缓冲区尺寸不匹配"));
                return Ok(None);
            };

            self.count += 1;
            match self.tx.try_send(image) {
                Ok(()) => {}
                // 检测循环跟不上时丢弃新帧
                Err(TrySendError::Full(_)) => self.dropped_frames += 1,
                Err(TrySendError::Disconnected(_)) => {
                    return Err("frame receiver dropped".to_string());
                }
            }
        }

        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            let drop_rate = self.dropped_frames as f64 / self.total_frames as f64 * 100.0;
            debug!(
                "📺 解码统计: 解码{}帧 | 实际{:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
                self.count,
                self.count as f64 / elapsed,
                self.total_frames,
                self.dropped_frames,
                drop_rate
            );
            self.last = Instant::now();
            self.count = 0;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!("✅ 解码线程退出");
    }
}

/// YUV420P → RGB24 (BT.601, 定点系数 ×128)
#[inline]
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
}
