/// 检测系统数据结构定义
/// Data structures for the detection system
use image::RgbImage;
use std::sync::Arc;

// ========== 公共常量 ==========

/// YOLO推理输入尺寸
pub const INF_SIZE: u32 = 640;

/// COCO类别: 0=person
pub const PERSON_CLASS_ID: u32 = 0;

// ========== 数据结构 ==========

/// 共享帧 (检测线程 → 证据缓存 / 通知线程 / 显示), Arc避免复制
pub type Frame = Arc<RgbImage>;

/// 检测框 (Detection bounding box), 坐标相对于送入检测器的图像
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// 平移到整帧坐标 (ROI裁剪图 → 原图)
    pub fn offset(&self, dx: f32, dy: f32) -> BBox {
        BBox {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
            ..self.clone()
        }
    }

    pub fn label(&self) -> String {
        format!("{} {:.2}", class_name(self.class_id), self.confidence)
    }
}

pub fn class_name(class_id: u32) -> &'static str {
    match class_id {
        PERSON_CLASS_ID => "person",
        _ => "object",
    }
}

/// 单个ROI在一帧中的检测归约结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersonPresence {
    pub detected: bool,
    /// 合格检测中的最高置信度 (用于日志)
    pub confidence: Option<f32>,
    /// 合格检测框 (用于叠加标注)
    pub boxes: Vec<BBox>,
}

/// 检测框归约: class=0 且置信度 ≥ 阈值 即视为 "有人"
pub fn reduce_person(detections: &[BBox], conf_threshold: f32) -> PersonPresence {
    let boxes: Vec<BBox> = detections
        .iter()
        .filter(|b| b.class_id == PERSON_CLASS_ID && b.confidence >= conf_threshold)
        .cloned()
        .collect();
    let confidence = boxes.iter().map(|b| b.confidence).reduce(f32::max);

    PersonPresence {
        detected: !boxes.is_empty(),
        confidence,
        boxes,
    }
}

/// 非极大值抑制 (按置信度降序, IoU 超过阈值的框被丢弃)
pub fn non_max_suppression(xs: &mut Vec<BBox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].iou(&xs[index]) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: u32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_reduce_person_keeps_max_confidence() {
        let dets = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.62, 0),
            bbox(5.0, 5.0, 20.0, 20.0, 0.91, 0),
            bbox(0.0, 0.0, 10.0, 10.0, 0.99, 56), // chair
            bbox(0.0, 0.0, 10.0, 10.0, 0.30, 0),  // 低于阈值
        ];
        let presence = reduce_person(&dets, 0.5);
        assert!(presence.detected);
        assert_eq!(presence.confidence, Some(0.91));
        assert_eq!(presence.boxes.len(), 2);
    }

    #[test]
    fn test_reduce_person_threshold_inclusive() {
        let dets = vec![bbox(0.0, 0.0, 1.0, 1.0, 0.5, 0)];
        assert!(reduce_person(&dets, 0.5).detected);
        assert_eq!(reduce_person(&[], 0.5), PersonPresence::default());
    }

    #[test]
    fn test_nms_drops_overlapping() {
        let mut dets = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.6, 0),
            bbox(1.0, 1.0, 10.0, 10.0, 0.9, 0),
            bbox(50.0, 50.0, 60.0, 60.0, 0.7, 0),
        ];
        non_max_suppression(&mut dets, 0.45);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].confidence, 0.9);
        assert_eq!(dets[1].confidence, 0.7);
    }

    #[test]
    fn test_offset_and_label() {
        let b = bbox(1.0, 2.0, 3.0, 4.0, 0.876, 0).offset(10.0, 20.0);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (11.0, 22.0, 13.0, 24.0));
        assert_eq!(b.label(), "person 0.88");
    }
}
