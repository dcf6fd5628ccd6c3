// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 光流辅助的实例追踪器
//! Flow-assisted instance tracker
//!
//! 每帧流程:
//! 1. 预剔除到目标实例数 (重叠 IOU 过滤 + 按分数截断)
//! 2. 历史窗口内的已追踪实例经光流平移到当前帧, 作为候选
//! 3. 候选与当前检测计算相似度, 每个追踪取候选中的最大值
//! 4. 贪心匹配, 未匹配的检测新建追踪
//!
//! 全部帧追踪完成后, 每帧清理到 `clean_instance_count` 个实例, 再连接单帧断裂

use std::collections::{BTreeMap, VecDeque};

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use tracing::debug;

use super::optical_flow::{track_points, FlowParams, Pyramid};
use super::tracker::{
    centroid_similarity, connect_single_breaks, cull_instances, greedy_match,
    instance_similarity, iou_similarity, Tracker,
};
use super::types::{DetectionInstance, Frame, NodePoint};
use crate::tracker_config::{Similarity, TrackerConfig, TrackerKind};

/// 窗口中的一帧
#[derive(Clone)]
struct WindowFrame {
    frame_idx: usize,
    pyramid: Option<Pyramid>,
    instances: Vec<DetectionInstance>,
}

/// 逐帧传递的追踪状态
#[derive(Clone, Default)]
pub struct TrackState {
    window: VecDeque<WindowFrame>,
    next_id: u32,
}

impl TrackState {
    /// 已分配的追踪数
    pub fn assigned(&self) -> usize {
        self.next_id as usize
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

pub struct FlowTracker {
    config: TrackerConfig,
    flow: FlowParams,
    state: TrackState,
}

impl FlowTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let flow = FlowParams::new(config.of_window_size, config.of_max_levels);
        Self {
            config,
            flow,
            state: TrackState::default(),
        }
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    fn similarity(&self, reference: &DetectionInstance, query: &DetectionInstance) -> f32 {
        match self.config.similarity {
            Similarity::Instance => instance_similarity(reference, query),
            Similarity::Centroid => centroid_similarity(reference, query),
            Similarity::Iou => iou_similarity(reference, query),
        }
    }

    /// 缩放后的灰度金字塔
    fn pyramid_for(&self, image: &RgbImage) -> Pyramid {
        let gray = imageops::grayscale(image);
        let scale = self.config.img_scale;
        let gray: GrayImage = if (scale - 1.0).abs() > f32::EPSILON && scale > 0.0 {
            let w = ((gray.width() as f32 * scale).round() as u32).max(1);
            let h = ((gray.height() as f32 * scale).round() as u32).max(1);
            imageops::resize(&gray, w, h, FilterType::Triangle)
        } else {
            gray
        };
        Pyramid::build(&gray, &self.flow)
    }

    /// 把历史实例经光流平移到当前帧
    fn shift_instance(
        &self,
        instance: &DetectionInstance,
        from: &Pyramid,
        to: &Pyramid,
    ) -> DetectionInstance {
        let scale = self.config.img_scale;
        let visible: Vec<(usize, (f32, f32))> = instance
            .visible_points()
            .map(|(i, p)| (i, (p.x * scale, p.y * scale)))
            .collect();
        let coords: Vec<(f32, f32)> = visible.iter().map(|(_, c)| *c).collect();
        let moved = track_points(from, to, &coords, &self.flow);

        let mut points = vec![None; instance.points.len()];
        for ((node, _), new_pos) in visible.into_iter().zip(moved) {
            if let (Some((x, y)), Some(old)) = (new_pos, instance.points[node]) {
                points[node] = Some(NodePoint::new(x / scale, y / scale, old.score));
            }
        }

        DetectionInstance {
            points,
            score: instance.score,
            track: instance.track,
        }
    }

    /// 生成 (追踪ID, 候选实例)
    fn candidates(&self, current: Option<&Pyramid>) -> Vec<(u32, DetectionInstance)> {
        let use_flow = self.config.tracker == TrackerKind::Flow;
        let mut out = Vec::new();

        for past in &self.state.window {
            for inst in &past.instances {
                let Some(track) = inst.track else { continue };
                let candidate = match (use_flow, past.pyramid.as_ref(), current) {
                    (true, Some(from), Some(to)) => self.shift_instance(inst, from, to),
                    _ => inst.clone(),
                };
                if candidate.visible_count() >= self.config.min_match_points {
                    out.push((track, candidate));
                }
            }
        }

        out
    }
}

impl Tracker for FlowTracker {
    fn track(
        &mut self,
        frame_idx: usize,
        instances: Vec<DetectionInstance>,
        image: Option<&RgbImage>,
    ) -> Vec<DetectionInstance> {
        let mut instances = if self.config.pre_cull_to_target {
            cull_instances(
                instances,
                self.config.target_instance_count,
                Some(self.config.pre_cull_iou_threshold),
            )
        } else {
            instances
        };

        let pyramid = match (self.config.tracker, image) {
            (TrackerKind::Flow, Some(img)) => Some(self.pyramid_for(img)),
            _ => None,
        };

        // 每个追踪在所有候选中取最大相似度
        let candidates = self.candidates(pyramid.as_ref());
        let mut best: BTreeMap<u32, Vec<f32>> = BTreeMap::new();
        for (track, candidate) in &candidates {
            let row = best
                .entry(*track)
                .or_insert_with(|| vec![f32::NEG_INFINITY; instances.len()]);
            for (col, inst) in instances.iter().enumerate() {
                row[col] = row[col].max(self.similarity(candidate, inst));
            }
        }

        let track_ids: Vec<u32> = best.keys().copied().collect();
        let scores: Vec<Vec<f32>> = best.into_values().collect();

        for inst in instances.iter_mut() {
            inst.track = None;
        }
        for (row, col) in greedy_match(&scores) {
            instances[col].track = Some(track_ids[row]);
        }

        // 未匹配的检测新建追踪
        for inst in instances.iter_mut() {
            if inst.track.is_none() && inst.visible_count() >= self.config.min_new_track_points {
                inst.track = Some(self.state.next_id);
                self.state.next_id += 1;
            }
        }

        debug!(
            "帧 {}: {} 个实例, {} 个候选, 累计追踪 {}",
            frame_idx,
            instances.len(),
            candidates.len(),
            self.state.next_id
        );

        self.state.window.push_back(WindowFrame {
            frame_idx,
            pyramid,
            instances: instances.clone(),
        });
        while self.state.window.len() > self.config.track_window {
            self.state.window.pop_front();
        }

        instances
    }

    fn finalize(&mut self, frames: &mut [Frame]) {
        if self.config.clean_instance_count > 0 {
            for frame in frames.iter_mut() {
                let instances = std::mem::take(&mut frame.instances);
                frame.instances = cull_instances(
                    instances,
                    self.config.clean_instance_count,
                    self.config.clean_iou_threshold,
                );
            }
        }
        if self.config.post_connect_single_breaks {
            connect_single_breaks(frames, self.config.target_instance_count);
        }
        if let Some(last) = self.state.window.back() {
            debug!("追踪结束于帧 {}", last.frame_idx);
        }
    }

    fn reset(&mut self) {
        self.state = TrackState::default();
    }

    fn track_count(&self) -> usize {
        self.state.assigned()
    }
}
