/// 检测系统 (Detection System)
///
/// 在检测线程中按ROI调用
/// - Detector: 目标检测接口
/// - Types:    检测框 / 人形归约 / NMS
/// - Yolo:     ONNX YOLO 实现 (feature = "onnx")
pub mod detector;
pub mod types;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use detector::Detector;
pub use types::{reduce_person, BBox, Frame, PersonPresence, PERSON_CLASS_ID};
#[cfg(feature = "onnx")]
pub use yolo::{YoloConfig, YoloDetector};
