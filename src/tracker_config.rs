//! 追踪器配置 - 通过JSON文件调整参数

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::detection::flow_tracker::FlowTracker;
use crate::detection::tracker::{Tracker, TrackerBuilder};

/// 追踪器类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    /// 光流辅助: 历史实例经光流平移到当前帧后再匹配
    Flow,
    /// 直接用历史实例匹配
    Simple,
}

/// 实例相似度度量
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    Instance,
    Centroid,
    Iou,
}

/// 匹配策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    Greedy,
}

/// 追踪器参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // === 通用参数 ===
    pub tracker: TrackerKind, // 追踪器类型
    pub track_window: usize,  // 参与匹配的历史帧数

    // === 匹配参数 ===
    pub similarity: Similarity,
    pub match_strategy: MatchStrategy,
    pub min_new_track_points: usize, // 新建追踪所需最少可见节点数
    pub min_match_points: usize,     // 候选实例参与匹配所需最少可见节点数

    // === 光流参数 (仅 flow) ===
    pub img_scale: f32,       // 光流计算时的图像缩放
    pub of_window_size: usize, // LK窗口大小(像素)
    pub of_max_levels: usize,  // 金字塔层数

    // === 预过滤 ===
    pub target_instance_count: usize, // 每帧目标实例数
    pub pre_cull_to_target: bool,
    pub pre_cull_iou_threshold: f32,

    // === 后处理 ===
    pub clean_instance_count: usize, // 追踪结束后每帧保留的实例数, 0 表示不清理
    pub clean_iou_threshold: Option<f32>,
    pub post_connect_single_breaks: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerKind::Flow,
            track_window: 5,

            similarity: Similarity::Instance,
            match_strategy: MatchStrategy::Greedy,
            min_new_track_points: 1,
            min_match_points: 1,

            img_scale: 0.5,
            of_window_size: 21,
            of_max_levels: 3,

            target_instance_count: 1,
            pre_cull_to_target: true,
            pre_cull_iou_threshold: 0.8,

            clean_instance_count: 1,
            clean_iou_threshold: None,
            post_connect_single_breaks: true,
        }
    }
}

impl TrackerConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 追踪配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  追踪配置解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 追踪配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存追踪配置失败: {}", e);
                } else {
                    info!("💾 追踪配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化追踪配置失败: {}", e),
        }
    }

    pub fn with_target_instance_count(mut self, count: usize) -> Self {
        self.target_instance_count = count;
        self.clean_instance_count = count;
        self
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前追踪器配置:");
        info!(
            "  类型: {:?} | 窗口: {} 帧 | 相似度: {:?} | 匹配: {:?}",
            self.tracker, self.track_window, self.similarity, self.match_strategy
        );
        info!(
            "  光流: 缩放 {:.2} | 窗口 {} | 金字塔 {} 层",
            self.img_scale, self.of_window_size, self.of_max_levels
        );
        info!(
            "  目标实例数: {} | 预剔除: {} (IOU>{:.2}) | 连接单帧断裂: {}",
            self.target_instance_count,
            self.pre_cull_to_target,
            self.pre_cull_iou_threshold,
            self.post_connect_single_breaks
        );
        info!(
            "  追踪后清理: 每帧 {} 个实例 | IOU阈值: {:?}",
            self.clean_instance_count, self.clean_iou_threshold
        );
    }
}

impl TrackerBuilder for TrackerConfig {
    fn build(&self, target_instance_count: usize) -> Box<dyn Tracker> {
        Box::new(FlowTracker::new(
            self.clone().with_target_instance_count(target_instance_count),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_flow_setup() {
        let c = TrackerConfig::default();
        assert_eq!(c.tracker, TrackerKind::Flow);
        assert_eq!(c.track_window, 5);
        assert_eq!(c.similarity, Similarity::Instance);
        assert_eq!(c.match_strategy, MatchStrategy::Greedy);
        assert_eq!(c.img_scale, 0.5);
        assert_eq!(c.of_window_size, 21);
        assert_eq!(c.of_max_levels, 3);
        assert!(c.pre_cull_to_target);
        assert_eq!(c.pre_cull_iou_threshold, 0.8);
        assert!(c.post_connect_single_breaks);
        assert_eq!(c.clean_instance_count, 1);
        assert_eq!(c.clean_iou_threshold, None);
    }

    #[test]
    fn test_target_count_also_sets_clean_count() {
        let c = TrackerConfig::default().with_target_instance_count(4);
        assert_eq!(c.target_instance_count, 4);
        assert_eq!(c.clean_instance_count, 4);

        let c: TrackerConfig =
            serde_json::from_str(r#"{"clean_instance_count": 0, "clean_iou_threshold": 0.5}"#)
                .unwrap();
        assert_eq!(c.clean_instance_count, 0);
        assert_eq!(c.clean_iou_threshold, Some(0.5));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c: TrackerConfig =
            serde_json::from_str(r#"{"tracker": "simple", "track_window": 3}"#).unwrap();
        assert_eq!(c.tracker, TrackerKind::Simple);
        assert_eq!(c.track_window, 3);
        assert_eq!(c.of_window_size, 21);
    }

    #[test]
    fn test_load_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        let c = TrackerConfig::load(&path);
        assert_eq!(c, TrackerConfig::default());
        assert!(path.exists());

        let reloaded = TrackerConfig::load(&path);
        assert_eq!(reloaded, c);
    }

    #[test]
    fn test_builder_applies_target_count() {
        let tracker = TrackerConfig::default().build(3);
        assert_eq!(tracker.track_count(), 0);
    }
}
