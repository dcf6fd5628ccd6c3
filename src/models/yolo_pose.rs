// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{s, Array, Array4, ArrayView2, Axis, Ix3};
use ort::{GraphOptimizationLevel, Session, Tensor, ValueType};
use tracing::{debug, info};

use super::Predictor;
use crate::detection::{BBox, DetectionInstance, Frame, NodePoint, Skeleton};
use crate::error::{PipelineError, Result};
use crate::input::{discover, VideoStream};
use crate::non_max_suppression;

const CXYWH_OFFSET: usize = 4;
const KPT_STEP: usize = 3;

/// 模型参数
#[derive(Debug, Clone)]
pub struct YoloPoseConfig {
    /// ONNX 模型文件
    pub model: PathBuf,
    /// 关键点名称, 数量即模型的关键点数
    pub skeleton: Skeleton,
    /// 类别数
    pub nc: usize,
    pub conf: f32,
    pub kconf: f32,
    pub iou: f32,
    /// 每帧最多保留的实例数 (None = 不限)
    pub max_instances: Option<usize>,
    /// 动态输入尺寸时使用的默认尺寸
    pub default_size: u32,
}

impl YoloPoseConfig {
    pub fn new(model: PathBuf, skeleton: Skeleton) -> Self {
        Self {
            model,
            skeleton,
            nc: 1,
            conf: 0.25,
            kconf: 0.5,
            iou: 0.45,
            max_instances: None,
            default_size: 640,
        }
    }
}

/// 模型路径: 文件直接使用, 目录取其中第一个 `.onnx` 文件
pub fn resolve_model_path(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_dir() {
        let models = discover(path, ".onnx")?;
        if let Some(first) = models.into_iter().next() {
            return Ok(first.path);
        }
    }
    Err(PipelineError::NotFound(path.to_path_buf()))
}

fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 等比缩放到 (width, height), 左上对齐, 其余填充灰色
///
/// 返回 NCHW 张量与缩放比例
pub fn letterbox(image: &RgbImage, width: u32, height: u32) -> (Array4<f32>, f32) {
    let (w0, h0) = image.dimensions();
    let (ratio, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
    let resized = imageops::resize(
        image,
        (w_new as u32).clamp(1, width),
        (h_new as u32).clamp(1, height),
        FilterType::Triangle,
    );

    let mut ys = Array::from_elem((1, 3, height as usize, width as usize), 144.0 / 255.0);
    for (x, y, rgb) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = rgb.0;
        ys[[0, 0, y, x]] = (r as f32) / 255.0;
        ys[[0, 1, y, x]] = (g as f32) / 255.0;
        ys[[0, 2, y, x]] = (b as f32) / 255.0;
    }
    (ys, ratio)
}

/// 输出通道数 = 4 + nc + 3*nk
pub fn expected_channels(nc: usize, nk: usize) -> usize {
    CXYWH_OFFSET + nc + KPT_STEP * nk
}

/// 检查输出通道数与类别数/关键点数是否一致
pub fn check_output_channels(channels: usize, nc: usize, nk: usize) -> Result<()> {
    if channels == expected_channels(nc, nk) {
        return Ok(());
    }
    let implied = channels
        .checked_sub(CXYWH_OFFSET + nc)
        .filter(|rest| rest % KPT_STEP == 0)
        .map(|rest| format!("模型应有 {} 个关键点", rest / KPT_STEP))
        .unwrap_or_else(|| "无法推断模型关键点数".to_string());
    Err(PipelineError::Inference(format!(
        "输出通道数 {} 与 {} 个类别 + {} 个关键点不匹配 ({})",
        channels, nc, nk, implied
    )))
}

/// 解码单张图的 YOLOv8-pose 输出
///
/// `preds` 形状为 `[4 + nc + 3*nk, anchors]`; 坐标按 `ratio` 还原到原图并裁剪
#[allow(clippy::too_many_arguments)]
pub fn decode_pose_output(
    preds: ArrayView2<f32>,
    nc: usize,
    nk: usize,
    ratio: f32,
    width_original: f32,
    height_original: f32,
    conf: f32,
    kconf: f32,
    iou: f32,
) -> Result<Vec<DetectionInstance>> {
    check_output_channels(preds.shape()[0], nc, nk)?;

    let mut data: Vec<(BBox, DetectionInstance)> = Vec::new();
    for pred in preds.axis_iter(Axis(1)) {
        let bbox = pred.slice(s![0..CXYWH_OFFSET]);
        let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);
        let kpts = pred.slice(s![CXYWH_OFFSET + nc..]);

        let confidence = clss.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if confidence < conf {
            continue;
        }

        let cx = bbox[0] / ratio;
        let cy = bbox[1] / ratio;
        let w = bbox[2] / ratio;
        let h = bbox[3] / ratio;
        let x1 = (cx - w / 2.).max(0.0).min(width_original);
        let y1 = (cy - h / 2.).max(0.0).min(height_original);
        let y_bbox = BBox {
            x1,
            y1,
            x2: (x1 + w).min(width_original),
            y2: (y1 + h).min(height_original),
        };

        let points = (0..nk)
            .map(|i| {
                let kx = kpts[KPT_STEP * i] / ratio;
                let ky = kpts[KPT_STEP * i + 1] / ratio;
                let score = kpts[KPT_STEP * i + 2];
                if score < kconf {
                    None
                } else {
                    Some(NodePoint::new(
                        kx.max(0.0).min(width_original),
                        ky.max(0.0).min(height_original),
                        score,
                    ))
                }
            })
            .collect();

        data.push((y_bbox, DetectionInstance::new(points, confidence)));
    }

    non_max_suppression(&mut data, iou);
    Ok(data.into_iter().map(|(_, inst)| inst).collect())
}

/// YOLOv8-pose 预测器 (ONNX Runtime)
pub struct YoloPosePredictor {
    session: Session,
    config: YoloPoseConfig,
    width: u32,
    height: u32,
    output_name: String,
}

impl YoloPosePredictor {
    pub fn new(config: YoloPoseConfig) -> Result<Self> {
        let model = resolve_model_path(&config.model)?;
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&model)?;

        // 输入 NCHW, 动态维度为 -1
        let (height, width) = match session.inputs.first().map(|i| &i.input_type) {
            Some(ValueType::Tensor { dimensions, .. }) if dimensions.len() == 4 => {
                let dim = |d: i64| if d > 0 { d as u32 } else { config.default_size };
                (dim(dimensions[2]), dim(dimensions[3]))
            }
            _ => (config.default_size, config.default_size),
        };
        let output = session
            .outputs
            .first()
            .ok_or_else(|| PipelineError::Inference("模型没有输出".to_string()))?;
        // 输出 [batch, channels, anchors], 通道数为静态时提前校验骨架
        if let ValueType::Tensor { dimensions, .. } = &output.output_type {
            if let Some(&channels) = dimensions.get(1).filter(|&&c| c > 0) {
                check_output_channels(channels as usize, config.nc, config.skeleton.len())?;
            }
        }
        let output_name = output.name.clone();

        let predictor = Self {
            session,
            config: YoloPoseConfig { model, ..config },
            width,
            height,
            output_name,
        };
        predictor.summary();
        Ok(predictor)
    }

    pub fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Model: {}\n\
            > Height: {}, Width: {}\n\
            > nc: {}, nk: {}, conf: {}, kconf: {}, iou: {}\n",
            self.config.model.display(),
            self.height,
            self.width,
            self.config.nc,
            self.config.skeleton.len(),
            self.config.conf,
            self.config.kconf,
            self.config.iou,
        );
    }

    /// 单张图推理
    pub fn predict_image(&mut self, image: &RgbImage) -> Result<Vec<DetectionInstance>> {
        let (x, ratio) = letterbox(image, self.width, self.height);
        let outputs = self.session.run(ort::inputs![Tensor::from_array(x)?]?)?;
        let ys = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()?
            .into_dimensionality::<Ix3>()
            .map_err(|e| PipelineError::Inference(format!("输出形状错误: {}", e)))?;

        let mut instances = decode_pose_output(
            ys.index_axis(Axis(0), 0),
            self.config.nc,
            self.config.skeleton.len(),
            ratio,
            image.width() as f32,
            image.height() as f32,
            self.config.conf,
            self.config.kconf,
            self.config.iou,
        )?;
        if let Some(max) = self.config.max_instances {
            instances.truncate(max);
        }
        Ok(instances)
    }
}

impl Predictor for YoloPosePredictor {
    fn skeleton(&self) -> &Skeleton {
        &self.config.skeleton
    }

    fn infer(&mut self, stream: &mut dyn VideoStream) -> Result<Vec<Frame>> {
        let t_start = Instant::now();
        let total = stream.info().frame_count;
        let mut frames = Vec::with_capacity(total);

        while let Some(frame) = stream.next_frame()? {
            let instances = self.predict_image(&frame.image)?;
            frames.push(Frame::new(frame.index, instances));
            if frames.len() % 100 == 0 {
                info!("🧠 推理进度 {}/{}", frames.len(), total);
            }
        }

        debug!(
            "[Model Inference]: {} 帧, {:?}",
            frames.len(),
            t_start.elapsed()
        );
        Ok(frames)
    }
}
