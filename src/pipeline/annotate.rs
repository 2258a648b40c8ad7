//! 叠加标注: ROI边框 + 人形检测框 + 标签
//!
//! 标签优先用配置的 TTF/OTF 字体绘制; 字体缺失时回落到内置的 5x7 点阵字形,
//! 保证 "person 0.87" 始终出现在画面、录像和证据帧中。
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect as DrawRect;
use std::path::Path;
use tracing::{info, warn};

use crate::detection::types::BBox;
use crate::roi::Rect;

const ROI_COLOR: Rgb<u8> = Rgb([255, 200, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_SCALE: f32 = 16.0;

/// 点阵字形: 每行低5位, 最高位在左
const GLYPH_ROWS: usize = 7;
const GLYPH_COLS: u32 = 5;
/// 点阵放大倍数 (5x7 → 10x14)
const DOT: u32 = 2;

/// 标注器; 未加载字体时用内置点阵字形写标签
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// 从TTF/OTF文件加载标签字体
    pub fn with_font_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.as_ref().display(), e))?;
        Ok(Self::new(Some(font)))
    }

    /// 按配置加载字体; 文件缺失或损坏时告警并使用点阵字形
    pub fn load(font: Option<&str>) -> Self {
        let Some(path) = font else {
            return Self::default();
        };
        match Self::with_font_file(path) {
            Ok(annotator) => {
                info!("🔤 标签字体: {}", path);
                annotator
            }
            Err(e) => {
                warn!("⚠️ 字体加载失败, 使用内置点阵字形: {}", e);
                Self::default()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// ROI 外框 + 编号
    pub fn draw_roi(&self, canvas: &mut RgbImage, rect: Rect, label: &str) {
        let (x, y) = (rect.x as f32, rect.y as f32);
        draw_rect(canvas, x, y, rect.width as f32, rect.height as f32, ROI_COLOR);
        self.draw_label(canvas, rect.x as i32 + 2, rect.y as i32 + 2, label, ROI_COLOR);
    }

    /// 检测框 (整帧坐标) + "person 0.87"
    pub fn draw_person(&self, canvas: &mut RgbImage, bbox: &BBox) {
        draw_rect(canvas, bbox.x1, bbox.y1, bbox.width(), bbox.height(), BOX_COLOR);
        let y = (bbox.y1 as i32 - LABEL_SCALE as i32).max(0);
        self.draw_label(canvas, bbox.x1 as i32, y, &bbox.label(), BOX_COLOR);
    }

    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x, y, PxScale::from(LABEL_SCALE), font, text);
        } else {
            draw_dot_text(canvas, x, y, text, color);
        }
    }
}

fn draw_rect(canvas: &mut RgbImage, x: f32, y: f32, w: f32, h: f32, color: Rgb<u8>) {
    let (w, h) = (w.round() as u32, h.round() as u32);
    // imageproc 不接受零尺寸矩形
    if w == 0 || h == 0 {
        return;
    }
    let rect = DrawRect::at(x.round() as i32, y.round() as i32).of_size(w, h);
    draw_hollow_rect_mut(canvas, rect, color);
}

/// 点阵文字; 没有字形的字符留空
fn draw_dot_text(canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let advance = ((GLYPH_COLS + 1) * DOT) as i32;
    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let gx = x + i as i32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if bits & (1 << (GLYPH_COLS - 1 - col)) == 0 {
                    continue;
                }
                let dot = DrawRect::at(gx + (col * DOT) as i32, y + (row as u32 * DOT) as i32)
                    .of_size(DOT, DOT);
                // 超出画面的部分由 imageproc 裁掉
                draw_filled_rect_mut(canvas, dot, color);
            }
        }
    }
}

/// 标签用到的字符: 类别名、ROI编号、置信度
fn glyph(ch: char) -> Option<[u8; GLYPH_ROWS]> {
    let rows = match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'b' => [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x1E],
        'c' => [0x00, 0x00, 0x0E, 0x10, 0x10, 0x11, 0x0E],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        'j' => [0x02, 0x00, 0x06, 0x02, 0x02, 0x12, 0x0C],
        'n' => [0x00, 0x00, 0x16, 0x19, 0x11, 0x11, 0x11],
        'o' => [0x00, 0x00, 0x0E, 0x11, 0x11, 0x11, 0x0E],
        'p' => [0x00, 0x00, 0x1E, 0x11, 0x1E, 0x10, 0x10],
        'r' => [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10],
        's' => [0x00, 0x00, 0x0F, 0x10, 0x0E, 0x01, 0x1E],
        't' => [0x08, 0x08, 0x1C, 0x08, 0x08, 0x09, 0x06],
        _ => return None,
    };
    Some(rows)
}
