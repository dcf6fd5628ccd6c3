// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 姿态预测数据结构定义
/// Data structures for pose predictions and persisted artifacts
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ========== 骨架 ==========

/// 骨架: 有序的关键点名称列表 (决定CSV列结构)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Skeleton {
    pub nodes: Vec<String>,
}

impl Skeleton {
    pub fn new<S: Into<String>>(nodes: impl IntoIterator<Item = S>) -> Self {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
        }
    }

    /// 按关键点数量生成默认名称 node_0, node_1, ...
    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("node_{}", i)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }
}

// ========== 检测结果 ==========

/// 关键点 (x, y, confidence)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodePoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl NodePoint {
    pub fn new(x: f32, y: f32, score: f32) -> Self {
        Self { x, y, score }
    }
}

/// 检测框 (由可见关键点计算)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// IOU (Intersection over Union), 退化框返回0
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 {
            return 0.0;
        }

        intersection / union
    }
}

/// 单帧中的一个检测实例 (一只动物)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionInstance {
    /// 与骨架节点一一对应, None 表示该节点未检测到
    pub points: Vec<Option<NodePoint>>,
    /// 实例整体置信度
    pub score: f32,
    /// 追踪ID (追踪前为 None)
    #[serde(default)]
    pub track: Option<u32>,
}

impl DetectionInstance {
    pub fn new(points: Vec<Option<NodePoint>>, score: f32) -> Self {
        Self {
            points,
            score,
            track: None,
        }
    }

    pub fn with_track(mut self, track: u32) -> Self {
        self.track = Some(track);
        self
    }

    pub fn visible_points(&self) -> impl Iterator<Item = (usize, &NodePoint)> + '_ {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (i, p)))
    }

    pub fn visible_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }

    /// 可见关键点的外接框
    pub fn bounding_box(&self) -> Option<BBox> {
        let mut it = self.visible_points();
        let (_, first) = it.next()?;
        let init = BBox {
            x1: first.x,
            y1: first.y,
            x2: first.x,
            y2: first.y,
        };
        Some(it.fold(init, |b, (_, p)| BBox {
            x1: b.x1.min(p.x),
            y1: b.y1.min(p.y),
            x2: b.x2.max(p.x),
            y2: b.y2.max(p.y),
        }))
    }

    pub fn centroid(&self) -> Option<(f32, f32)> {
        let n = self.visible_count();
        if n == 0 {
            return None;
        }
        let (sx, sy) = self
            .visible_points()
            .fold((0.0, 0.0), |(sx, sy), (_, p)| (sx + p.x, sy + p.y));
        Some((sx / n as f32, sy / n as f32))
    }
}

/// 一帧的全部检测 (追踪前顺序无语义)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub frame_idx: usize,
    pub instances: Vec<DetectionInstance>,
}

impl Frame {
    pub fn new(frame_idx: usize, instances: Vec<DetectionInstance>) -> Self {
        Self {
            frame_idx,
            instances,
        }
    }
}

// ========== 视频与持久化 ==========

/// 视频几何信息
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoInfo {
    pub frame_count: usize,
    pub height: u32,
    pub width: u32,
    pub fps: f64,
}

/// 追踪注册表条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: u32,
    pub name: String,
}

impl TrackInfo {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: format!("track_{}", id),
        }
    }
}

/// 单个视频的预测结果 (持久化单元)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionArtifact {
    /// 原始视频路径
    pub video: PathBuf,
    /// 实际解码的路径 (转码修复后为 fixed 文件)
    pub decoded_from: PathBuf,
    pub info: VideoInfo,
    pub skeleton: Skeleton,
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
    pub frames: Vec<Frame>,
}

impl PredictionArtifact {
    pub fn new(
        video: PathBuf,
        decoded_from: PathBuf,
        info: VideoInfo,
        skeleton: Skeleton,
        frames: Vec<Frame>,
    ) -> Self {
        Self {
            video,
            decoded_from,
            info,
            skeleton,
            tracks: Vec::new(),
            frames,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.frames.iter().map(|f| f.instances.len()).sum()
    }

    /// 清除所有追踪ID与追踪注册表
    pub fn strip_tracks(&mut self) {
        for instance in self.frames.iter_mut().flat_map(|f| f.instances.iter_mut()) {
            instance.track = None;
        }
        self.tracks.clear();
    }

    /// 根据实例上的追踪ID重建注册表
    pub fn rebuild_track_registry(&mut self) {
        let mut ids: Vec<u32> = self
            .frames
            .iter()
            .flat_map(|f| f.instances.iter().filter_map(|i| i.track))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        self.tracks = ids.into_iter().map(TrackInfo::new).collect();
    }

    /// 所有实例的节点数与骨架一致
    pub fn is_consistent(&self) -> bool {
        let n = self.skeleton.len();
        self.frames
            .iter()
            .flat_map(|f| f.instances.iter())
            .all(|i| i.points.len() == n)
    }
}
