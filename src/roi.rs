//! ROI 注册表 (Region-of-interest registry)
//!
//! 用户框选的矩形区域, 下标从0开始且在生命周期内稳定;
//! 只支持整体清空, 不支持单独删除。

use image::{imageops, RgbImage};

use crate::error::ConfigError;

/// 源帧像素坐标下的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 裁剪到帧范围内; 完全落在帧外时返回 None
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> Option<Rect> {
        if self.x >= frame_w || self.y >= frame_h {
            return None;
        }
        let width = self.width.min(frame_w - self.x);
        let height = self.height.min(frame_h - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Rect::new(self.x, self.y, width, height))
    }
}

impl From<[u32; 4]> for Rect {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Rect::new(x, y, width, height)
    }
}

/// 单个ROI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub index: usize,
    pub rect: Rect,
}

impl Roi {
    /// 日志/界面中使用的编号 ("ROI 1" 对应 index 0)
    pub fn label(&self) -> String {
        roi_label(self.index)
    }

    /// 从整帧中截取本区域 (越界部分被裁掉)
    pub fn crop(&self, frame: &RgbImage) -> Option<(Rect, RgbImage)> {
        let r = self.rect.clamp_to(frame.width(), frame.height())?;
        let view = imageops::crop_imm(frame, r.x, r.y, r.width, r.height);
        Some((r, view.to_image()))
    }
}

pub fn roi_label(index: usize) -> String {
    format!("ROI {}", index + 1)
}

/// 有序ROI集合
#[derive(Debug, Default, Clone)]
pub struct RoiRegistry {
    rois: Vec<Roi>,
}

impl RoiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加区域; 宽或高为0时拒绝, 注册表保持不变
    pub fn add(&mut self, rect: Rect) -> Result<Roi, ConfigError> {
        if rect.width == 0 || rect.height == 0 {
            return Err(ConfigError::InvalidRoi {
                width: rect.width,
                height: rect.height,
            });
        }
        let roi = Roi {
            index: self.rois.len(),
            rect,
        };
        self.rois.push(roi);
        Ok(roi)
    }

    pub fn clear(&mut self) {
        self.rois.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Roi> {
        self.rois.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Roi> {
        self.rois.get(index)
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assigns_stable_indices() {
        let mut registry = RoiRegistry::new();
        let a = registry.add(Rect::new(0, 0, 10, 10)).unwrap();
        let b = registry.add(Rect::new(5, 5, 20, 20)).unwrap();
        assert_eq!((a.index, b.index), (0, 1));
        assert_eq!(b.label(), "ROI 2");
    }

    #[test]
    fn test_reject_empty_rect() {
        let mut registry = RoiRegistry::new();
        registry.add(Rect::new(0, 0, 10, 10)).unwrap();
        let err = registry.add(Rect::new(3, 3, 0, 8)).unwrap_err();
        assert_eq!(err, ConfigError::InvalidRoi { width: 0, height: 8 });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear_restarts_numbering() {
        let mut registry = RoiRegistry::new();
        registry.add(Rect::new(0, 0, 10, 10)).unwrap();
        registry.add(Rect::new(0, 0, 10, 10)).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.add(Rect::new(1, 1, 4, 4)).unwrap().index, 0);
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = RgbImage::new(100, 50);
        let roi = Roi {
            index: 0,
            rect: Rect::new(80, 40, 50, 50),
        };
        let (r, crop) = roi.crop(&frame).unwrap();
        assert_eq!(r, Rect::new(80, 40, 20, 10));
        assert_eq!(crop.dimensions(), (20, 10));

        let outside = Roi {
            index: 1,
            rect: Rect::new(200, 0, 10, 10),
        };
        assert!(outside.crop(&frame).is_none());
    }
}
