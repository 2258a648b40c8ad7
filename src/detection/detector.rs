//! 检测器接口 (Detector)
//! 职责: ROI裁剪图 → 目标检测 → 检测框列表

use image::RgbImage;

use super::types::BBox;

/// 统一的目标检测接口
///
/// 返回的坐标相对于输入图像, 置信度在 [0, 1]。
/// 检测器只在检测线程内使用, 因此只要求 `Send`。
pub trait Detector: Send {
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Vec<BBox>>;

    /// 打印模型信息
    fn summary(&self) -> String {
        String::from("detector")
    }
}
