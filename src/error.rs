// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线错误类型
//! Error taxonomy for the prediction / export pipeline

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// 输入目录不存在或不是目录
    #[error("路径不存在或不是目录: {0}")]
    NotFound(PathBuf),

    /// 目录中没有匹配扩展名的文件
    #[error("在 {dir} 中没有找到 {extension} 文件")]
    NoMatchingFiles { extension: String, dir: PathBuf },

    /// 帧索引失败 (容器损坏等), 唯一可通过转码重试恢复的错误
    #[error("视频帧索引失败 {path}: {reason}")]
    DecodeIndex { path: PathBuf, reason: String },

    #[error("视频解码失败 {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("推理失败: {0}")]
    Inference(String),

    #[error("视频转码失败 {path}: {reason}")]
    Transcode { path: PathBuf, reason: String },

    #[error("追踪失败: {0}")]
    Tracking(String),

    /// 预测结果中没有关键点名称 (无实例或骨架为空)
    #[error("{0} 中没有可用的骨架节点数据")]
    MissingSkeletonData(String),

    #[error("模型错误: {0}")]
    Model(#[from] ort::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    /// 是否属于可通过 "转码 + 重试一次" 恢复的错误
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::DecodeIndex { .. })
    }

    pub fn decode_index(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::DecodeIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_decode_index_is_recoverable() {
        assert!(PipelineError::decode_index("a.mp4", "bad index").is_recoverable());
        assert!(!PipelineError::Inference("boom".into()).is_recoverable());
        assert!(!PipelineError::Decode {
            path: "a.mp4".into(),
            reason: "eof".into()
        }
        .is_recoverable());
        assert!(!PipelineError::NotFound("x".into()).is_recoverable());
    }

    #[test]
    fn test_messages_name_the_path() {
        let e = PipelineError::NoMatchingFiles {
            extension: ".mp4".into(),
            dir: "videos".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains(".mp4"));
        assert!(msg.contains("videos"));
    }
}
