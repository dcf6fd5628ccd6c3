// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::detection::Skeleton;
use crate::models::YoloPoseConfig;
use crate::pipeline::OutputLayout;
use crate::tracker_config::TrackerConfig;

/// 何时清空预测结果目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResetPolicy {
    /// 每次运行开始时清空一次 (含追踪结果目录)
    #[default]
    PerRun,
    /// 每个视频保存前清空 (只保留最后一个视频的结果)
    PerVideo,
    /// 从不清空
    Never,
}

/// 批量姿态估计 + 追踪 + CSV导出
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "批量视频姿态估计与多目标追踪", long_about = None)]
pub struct Args {
    /// 视频目录 (*.mp4 / *.MP4)
    pub video_dir: PathBuf,

    /// 输出目录, 默认为视频目录的同级目录 <video_dir>_output
    #[arg(short, long, visible_alias = "output_dir")]
    pub output_dir: Option<PathBuf>,

    /// 视频中的动物数量 (追踪目标实例数)
    #[arg(short, long, visible_alias = "number_of_animals", default_value_t = 1)]
    pub number_of_animals: usize,

    /// 启用多目标追踪
    #[arg(short, long)]
    pub tracking: bool,

    /// ONNX 姿态模型文件, 或包含模型的目录
    #[arg(short, long, default_value = "model")]
    pub model: PathBuf,

    /// 关键点名称, 逗号分隔
    #[arg(long, value_delimiter = ',')]
    pub nodes: Option<Vec<String>>,

    /// 未指定 --nodes 时的关键点数量
    #[arg(long, default_value_t = 17)]
    pub keypoints: usize,

    /// 模型的类别数
    #[arg(long, default_value_t = 1)]
    pub classes: usize,

    /// 检测置信度阈值
    #[arg(long, default_value_t = 0.25)]
    pub conf: f32,

    /// 关键点置信度阈值
    #[arg(long, default_value_t = 0.5)]
    pub kconf: f32,

    /// NMS IOU阈值
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// 预测结果目录清空策略
    #[arg(long, value_enum, default_value_t = ResetPolicy::PerRun)]
    pub reset: ResetPolicy,

    /// 追踪器参数 JSON 文件
    #[arg(long)]
    pub tracker_config: Option<PathBuf>,

    /// 输出每个关键点的置信度列
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub node_scores: bool,
}

impl Args {
    pub fn skeleton(&self) -> Skeleton {
        match &self.nodes {
            Some(nodes) if !nodes.is_empty() => Skeleton::new(nodes.iter().map(|n| n.trim())),
            _ => Skeleton::numbered(self.keypoints),
        }
    }

    pub fn layout(&self) -> OutputLayout {
        match &self.output_dir {
            Some(dir) => OutputLayout::new(dir.clone()),
            None => OutputLayout::for_video_dir(&self.video_dir),
        }
    }

    pub fn model_config(&self) -> YoloPoseConfig {
        YoloPoseConfig {
            conf: self.conf,
            kconf: self.kconf,
            iou: self.iou,
            nc: self.classes.max(1),
            ..YoloPoseConfig::new(self.model.clone(), self.skeleton())
        }
    }

    /// 追踪器参数: 指定文件时从文件加载, 否则使用默认值
    pub fn tracker_config(&self) -> TrackerConfig {
        let config = match &self.tracker_config {
            Some(path) => TrackerConfig::load(path),
            None => TrackerConfig::default(),
        };
        config.with_target_instance_count(self.number_of_animals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["posetrack", "videos"]).unwrap();
        assert_eq!(args.number_of_animals, 1);
        assert!(!args.tracking);
        assert_eq!(args.reset, ResetPolicy::PerRun);
        assert!(args.node_scores);
        assert_eq!(args.skeleton().len(), 17);
        assert_eq!(args.model_config().nc, 1);
        assert_eq!(args.layout().root, PathBuf::from("videos_output"));
    }

    #[test]
    fn test_aliases_and_nodes() {
        let args = Args::try_parse_from([
            "posetrack",
            "videos",
            "--output_dir",
            "out",
            "--number_of_animals",
            "3",
            "-t",
            "--nodes",
            "head, thorax,tail",
            "--reset",
            "per-video",
            "--node-scores",
            "false",
        ])
        .unwrap();
        assert_eq!(args.layout().root, PathBuf::from("out"));
        assert_eq!(args.number_of_animals, 3);
        assert!(args.tracking);
        assert_eq!(args.skeleton(), Skeleton::new(["head", "thorax", "tail"]));
        assert_eq!(args.reset, ResetPolicy::PerVideo);
        assert!(!args.node_scores);
        assert_eq!(args.tracker_config().target_instance_count, 3);
    }
}
