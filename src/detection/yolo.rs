// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 / YOLO11 ONNX 检测器
// 包含: 模型加载、letterbox预处理、推理、后处理(解码 + NMS)

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info};

use super::detector::Detector;
use super::types::{non_max_suppression, BBox, INF_SIZE};

/// 模型参数
#[derive(Clone, Debug)]
pub struct YoloConfig {
    pub model: String,
    pub inf_size: u32,
    /// 模型侧的最低置信度, 运行时阈值在此之上再过滤
    pub conf: f32,
    pub iou: f32,
    pub intra_threads: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            model: "models/yolo11n.onnx".to_string(),
            inf_size: INF_SIZE,
            conf: 0.10,
            iou: 0.45,
            intra_threads: 4,
        }
    }
}

/// letterbox 变换参数 (原图 → 推理输入)
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

pub struct YoloDetector {
    session: Session,
    input_name: String,
    config: YoloConfig,
    resizer: fr::Resizer,
}

impl YoloDetector {
    pub fn new(config: YoloConfig) -> Result<Self> {
        info!("📦 加载检测模型: {}", config.model);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(&config.model)
            .with_context(|| format!("模型加载失败: {}", config.model))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        info!("✅ YOLO 检测模型加载成功 (输入: {})", input_name);
        Ok(Self {
            session,
            input_name,
            config,
            resizer: fr::Resizer::new(),
        })
    }

    fn scale_wh(w0: f32, h0: f32, size: f32) -> (f32, u32, u32) {
        let r = (size / w0).min(size / h0);
        (r, ((w0 * r).round() as u32).max(1), ((h0 * r).round() as u32).max(1))
    }

    /// 预处理: 等比缩放 + 灰边填充 + HWC→CHW 归一化
    fn preprocess(&mut self, image: &RgbImage) -> Result<(Vec<f32>, Letterbox)> {
        let size = self.config.inf_size;
        let (w0, h0) = image.dimensions();
        let (scale, w1, h1) = Self::scale_wh(w0 as f32, h0 as f32, size as f32);

        let src =
            fr::images::Image::from_vec_u8(w0, h0, image.as_raw().clone(), fr::PixelType::U8x3)?;
        let mut dst = fr::images::Image::new(w1, h1, fr::PixelType::U8x3);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        let pad_x = ((size - w1) / 2) as usize;
        let pad_y = ((size - h1) / 2) as usize;
        let size = size as usize;
        let plane = size * size;

        let mut input = vec![114.0 / 255.0; 3 * plane];
        let resized = dst.buffer();
        for y in 0..h1 as usize {
            for x in 0..w1 as usize {
                let src_idx = (y * w1 as usize + x) * 3;
                let dst_idx = (y + pad_y) * size + (x + pad_x);
                for c in 0..3 {
                    input[c * plane + dst_idx] = resized[src_idx + c] as f32 / 255.0;
                }
            }
        }

        Ok((
            input,
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn infer(&mut self, input: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let size = self.config.inf_size as usize;
        let shape = [1, 3, size, size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])?;
        let (output_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims = output_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, data.to_vec()))
    }

    /// 后处理: [1, 4+nc, anchors] → 检测框 (原图坐标)
    fn postprocess(
        &self,
        dims: &[usize],
        output: &[f32],
        lb: Letterbox,
        w0: u32,
        h0: u32,
    ) -> Result<Vec<BBox>> {
        if dims.len() != 3 || dims[1] <= 4 {
            bail!("不支持的输出形状: {:?}", dims);
        }
        let (channels, anchors) = (dims[1], dims[2]);
        let nc = channels - 4;

        let mut bboxes = Vec::new();
        for i in 0..anchors {
            let (mut best_class, mut best_conf) = (0usize, 0.0f32);
            for c in 0..nc {
                let conf = output[anchors * (4 + c) + i];
                if conf > best_conf {
                    best_conf = conf;
                    best_class = c;
                }
            }
            if best_conf < self.config.conf {
                continue;
            }

            let cx = output[i];
            let cy = output[anchors + i];
            let w = output[anchors * 2 + i];
            let h = output[anchors * 3 + i];

            // 反 letterbox, 并限制在原图内
            let x1 = ((cx - w / 2.0 - lb.pad_x) / lb.scale).clamp(0.0, w0 as f32);
            let y1 = ((cy - h / 2.0 - lb.pad_y) / lb.scale).clamp(0.0, h0 as f32);
            let x2 = ((cx + w / 2.0 - lb.pad_x) / lb.scale).clamp(0.0, w0 as f32);
            let y2 = ((cy + h / 2.0 - lb.pad_y) / lb.scale).clamp(0.0, h0 as f32);

            bboxes.push(BBox {
                x1,
                y1,
                x2,
                y2,
                confidence: best_conf,
                class_id: best_class as u32,
            });
        }

        non_max_suppression(&mut bboxes, self.config.iou);
        Ok(bboxes)
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BBox>> {
        let (w0, h0) = image.dimensions();
        if w0 == 0 || h0 == 0 {
            return Ok(Vec::new());
        }
        let (input, lb) = self.preprocess(image)?;
        let (dims, output) = self.infer(input)?;
        let bboxes = self.postprocess(&dims, &output, lb, w0, h0)?;
        debug!("🎯 检测: {}个目标", bboxes.len());
        Ok(bboxes)
    }

    fn summary(&self) -> String {
        format!(
            "YOLO {} ({}x{}, conf={:.2}, iou={:.2})",
            self.config.model,
            self.config.inf_size,
            self.config.inf_size,
            self.config.conf,
            self.config.iou
        )
    }
}
