/// 姿态估计模型接口与实现
///
/// # 架构说明
///
/// ## Predictor Trait
/// 统一的预测接口: 按顺序消费一个视频流的全部帧, 输出逐帧的实例列表
///
/// ```text
/// VideoStream → next_frame → preprocess → 推理 → postprocess → Frame
/// ```
///
/// ## 实现
/// - **YoloPosePredictor**: YOLOv8-pose ONNX 模型 (ort)
///   - 模型加载 (new / resolve_model_path)
///   - 预处理 (letterbox)
///   - 后处理 (decode_pose_output + NMS)
///   - 文件: `yolo_pose.rs`
use crate::detection::{Frame, Skeleton};
use crate::error::Result;
use crate::input::VideoStream;

/// 姿态预测器
pub trait Predictor {
    /// 输出实例使用的骨架 (节点顺序与实例的点一一对应)
    fn skeleton(&self) -> &Skeleton;

    /// 对整段视频做推理, 返回按帧序号排列的预测结果
    fn infer(&mut self, stream: &mut dyn VideoStream) -> Result<Vec<Frame>>;
}

pub mod yolo_pose; // YOLOv8-pose 完整模型

pub use yolo_pose::{
    decode_pose_output, letterbox, resolve_model_path, YoloPoseConfig, YoloPosePredictor,
};
