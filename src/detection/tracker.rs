// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多目标追踪公共组件
//! Common components for multi-object tracking of pose instances

use std::collections::{BTreeSet, HashMap};

use image::RgbImage;

use super::types::{DetectionInstance, Frame};
use crate::error::{PipelineError, Result};

// ========== 追踪器统一接口 ==========

/// 多目标追踪器 Trait
///
/// 追踪是严格顺序的: 每帧的ID分配依赖之前所有帧累积的追踪状态,
/// 因此调用方必须按 frame_idx 递增顺序逐帧调用 `track`
pub trait Tracker {
    /// 处理一帧
    ///
    /// # 参数
    /// - `frame_idx`: 帧序号
    /// - `instances`: 当前帧的检测实例 (无序)
    /// - `image`: 当前帧图像 (光流匹配使用, 可选)
    ///
    /// # 返回
    /// 带追踪ID的实例
    fn track(
        &mut self,
        frame_idx: usize,
        instances: Vec<DetectionInstance>,
        image: Option<&RgbImage>,
    ) -> Vec<DetectionInstance>;

    /// 全部帧处理完后的后处理 (例如连接单帧断裂)
    fn finalize(&mut self, _frames: &mut [Frame]) {}

    /// 重置追踪器 (清除所有追踪)
    fn reset(&mut self);

    /// 已分配的追踪数量
    fn track_count(&self) -> usize;
}

/// 追踪器构造器: 每个视频构造一个新的追踪器
pub trait TrackerBuilder {
    fn build(&self, target_instance_count: usize) -> Box<dyn Tracker>;
}

/// 按帧序号递增顺序把整段序列送入追踪器
///
/// `image_for` 按帧序号提供帧图像 (调用顺序同样递增)
pub fn track_sequence<F>(
    tracker: &mut dyn Tracker,
    mut frames: Vec<Frame>,
    mut image_for: F,
) -> Result<Vec<Frame>>
where
    F: FnMut(usize) -> Result<Option<RgbImage>>,
{
    frames.sort_by_key(|f| f.frame_idx);
    if let Some(w) = frames.windows(2).find(|w| w[0].frame_idx == w[1].frame_idx) {
        return Err(PipelineError::Tracking(format!(
            "重复的帧序号 {}",
            w[0].frame_idx
        )));
    }

    let mut tracked = Vec::with_capacity(frames.len());
    for frame in frames {
        let image = image_for(frame.frame_idx)?;
        let instances = tracker.track(frame.frame_idx, frame.instances, image.as_ref());
        tracked.push(Frame::new(frame.frame_idx, instances));
    }

    tracker.finalize(&mut tracked);
    Ok(tracked)
}

// ========== 相似度 ==========

/// 实例相似度: 对应节点的高斯核距离之和 / 参考实例可见节点数
pub fn instance_similarity(reference: &DetectionInstance, query: &DetectionInstance) -> f32 {
    let ref_visible = reference.visible_count();
    if ref_visible == 0 {
        return 0.0;
    }

    let sum: f32 = reference
        .points
        .iter()
        .zip(query.points.iter())
        .filter_map(|(r, q)| match (r, q) {
            (Some(r), Some(q)) => {
                let d2 = (r.x - q.x).powi(2) + (r.y - q.y).powi(2);
                Some((-d2).exp())
            }
            _ => None,
        })
        .sum();

    sum / ref_visible as f32
}

/// 质心相似度 (负的质心距离)
pub fn centroid_similarity(reference: &DetectionInstance, query: &DetectionInstance) -> f32 {
    match (reference.centroid(), query.centroid()) {
        (Some((rx, ry)), Some((qx, qy))) => -((rx - qx).powi(2) + (ry - qy).powi(2)).sqrt(),
        _ => f32::NEG_INFINITY,
    }
}

/// 外接框IOU相似度
pub fn iou_similarity(reference: &DetectionInstance, query: &DetectionInstance) -> f32 {
    match (reference.bounding_box(), query.bounding_box()) {
        (Some(a), Some(b)) => a.iou(&b),
        _ => 0.0,
    }
}

// ========== 匹配 ==========

/// 贪心匹配: 按分数从高到低依次选取未使用的 (行, 列)
///
/// 非有限值的分数不参与匹配
pub fn greedy_match(scores: &[Vec<f32>]) -> Vec<(usize, usize)> {
    let mut candidates = Vec::new();
    for (row, cols) in scores.iter().enumerate() {
        for (col, &score) in cols.iter().enumerate() {
            if score.is_finite() {
                candidates.push((score, row, col));
            }
        }
    }

    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let n_cols = scores.iter().map(Vec::len).max().unwrap_or(0);
    let mut used_row = vec![false; scores.len()];
    let mut used_col = vec![false; n_cols];
    let mut assignments = Vec::new();

    for (_, row, col) in candidates {
        if !used_row[row] && !used_col[col] {
            assignments.push((row, col));
            used_row[row] = true;
            used_col[col] = true;
        }
    }

    assignments
}

// ========== 预过滤 / 后处理 ==========

/// 预剔除: 实例数超过目标时, 先剔除重叠 (IOU > 阈值) 中分数较低者,
/// 再保留分数最高的 `target` 个. 保留实例维持原有顺序.
/// `target == 0` 表示数量未知, 不做剔除
pub fn cull_instances(
    instances: Vec<DetectionInstance>,
    target: usize,
    iou_threshold: Option<f32>,
) -> Vec<DetectionInstance> {
    if target == 0 || instances.len() <= target {
        return instances;
    }

    let mut order: Vec<usize> = (0..instances.len()).collect();
    order.sort_by(|&a, &b| instances[b].score.total_cmp(&instances[a].score));

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        let overlaps = iou_threshold.is_some_and(|thr| {
            instances[idx].bounding_box().is_some_and(|b| {
                keep.iter().any(|&k| {
                    instances[k]
                        .bounding_box()
                        .is_some_and(|kb| kb.iou(&b) > thr)
                })
            })
        });
        if !overlaps {
            keep.push(idx);
        }
    }

    keep.truncate(target);
    keep.sort_unstable();

    let mut slots: Vec<Option<DetectionInstance>> = instances.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// 连接单帧断裂: 上一 "完整" 帧中消失了恰好一个追踪, 同时出现了恰好一个新追踪时,
/// 把新追踪改回旧ID, 并在后续帧中持续应用该映射
pub fn connect_single_breaks(frames: &mut [Frame], instance_count: usize) {
    let Some(first) = frames.first() else {
        return;
    };

    let track_set = |frame: &Frame| -> BTreeSet<u32> {
        frame.instances.iter().filter_map(|i| i.track).collect()
    };

    let mut fix_track_map: HashMap<u32, u32> = HashMap::new();
    let mut last_good_tracks = track_set(first);

    for frame in frames.iter_mut() {
        let mut frame_tracks = track_set(frame);

        // 应用之前记录的重映射
        if frame_tracks.iter().any(|t| fix_track_map.contains_key(t)) {
            for i in 0..frame.instances.len() {
                let Some(track) = frame.instances[i].track else {
                    continue;
                };
                if let Some(&fixed) = fix_track_map.get(&track) {
                    if !frame_tracks.contains(&fixed) {
                        frame.instances[i].track = Some(fixed);
                        frame_tracks = track_set(frame);
                    }
                }
            }
        }

        let extra: Vec<u32> = frame_tracks.difference(&last_good_tracks).copied().collect();
        let missing: Vec<u32> = last_good_tracks.difference(&frame_tracks).copied().collect();

        if extra.len() == 1 && missing.len() == 1 {
            let (old, new) = (extra[0], missing[0]);
            if let Some(inst) = frame.instances.iter_mut().find(|i| i.track == Some(old)) {
                inst.track = Some(new);
                fix_track_map.insert(old, new);
            }
        } else if frame_tracks.len() == instance_count {
            last_good_tracks = frame_tracks;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::NodePoint;

    fn inst(points: &[(f32, f32)], score: f32) -> DetectionInstance {
        DetectionInstance::new(
            points
                .iter()
                .map(|&(x, y)| Some(NodePoint::new(x, y, 1.0)))
                .collect(),
            score,
        )
    }

    fn tracked(track: u32) -> DetectionInstance {
        inst(&[(0.0, 0.0)], 1.0).with_track(track)
    }

    fn tracks_of(frame: &Frame) -> Vec<Option<u32>> {
        frame.instances.iter().map(|i| i.track).collect()
    }

    #[test]
    fn test_instance_similarity() {
        let a = inst(&[(0.0, 0.0), (10.0, 10.0)], 1.0);
        assert!((instance_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let far = inst(&[(100.0, 100.0), (200.0, 200.0)], 1.0);
        assert!(instance_similarity(&a, &far) < 1e-6);

        // 参考实例缺失节点不计入
        let mut partial = a.clone();
        partial.points[1] = None;
        assert!((instance_similarity(&partial, &a) - 1.0).abs() < 1e-6);
        assert!((instance_similarity(&a, &partial) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_greedy_match_prefers_highest_scores() {
        let scores = vec![vec![0.9, 0.8], vec![0.85, 0.1]];
        let mut m = greedy_match(&scores);
        m.sort();
        assert_eq!(m, vec![(0, 0), (1, 1)]);

        let ragged = vec![vec![0.2], vec![0.5, f32::NEG_INFINITY]];
        assert_eq!(greedy_match(&ragged), vec![(1, 0)]);
        assert!(greedy_match(&[]).is_empty());
    }

    #[test]
    fn test_cull_removes_overlap_then_low_scores() {
        let instances = vec![
            inst(&[(0.0, 0.0), (10.0, 10.0)], 0.5),
            inst(&[(0.0, 0.0), (10.0, 10.5)], 0.9), // 与第一个高度重叠
            inst(&[(50.0, 50.0), (60.0, 60.0)], 0.4),
        ];
        let kept = cull_instances(instances, 2, Some(0.8));
        let scores: Vec<f32> = kept.iter().map(|i| i.score).collect();
        assert_eq!(scores, vec![0.9, 0.4]);
    }

    #[test]
    fn test_cull_noop_within_target() {
        let instances = vec![inst(&[(0.0, 0.0)], 0.1), inst(&[(0.0, 0.0)], 0.2)];
        assert_eq!(cull_instances(instances.clone(), 2, Some(0.8)), instances);
    }

    #[test]
    fn test_cull_with_zero_target_keeps_all() {
        let instances = vec![
            inst(&[(0.0, 0.0), (10.0, 10.0)], 0.5),
            inst(&[(0.0, 0.0), (10.0, 10.5)], 0.9),
            inst(&[(50.0, 50.0), (60.0, 60.0)], 0.4),
        ];
        assert_eq!(cull_instances(instances.clone(), 0, Some(0.8)), instances);
        assert_eq!(cull_instances(instances.clone(), 0, None), instances);
    }

    #[test]
    fn test_connect_single_break_relabels_new_track() {
        let mut frames = vec![
            Frame::new(0, vec![tracked(1), tracked(2)]),
            Frame::new(1, vec![tracked(1), tracked(3)]),
            Frame::new(2, vec![tracked(1), tracked(3)]),
        ];
        connect_single_breaks(&mut frames, 2);
        assert_eq!(tracks_of(&frames[1]), vec![Some(1), Some(2)]);
        assert_eq!(tracks_of(&frames[2]), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_connect_single_break_leaves_ambiguous_frames() {
        let mut frames = vec![
            Frame::new(0, vec![tracked(1), tracked(2)]),
            Frame::new(1, vec![tracked(3), tracked(4)]),
        ];
        connect_single_breaks(&mut frames, 2);
        assert_eq!(tracks_of(&frames[1]), vec![Some(3), Some(4)]);
    }

    struct CountingTracker {
        seen: Vec<usize>,
    }

    impl Tracker for CountingTracker {
        fn track(
            &mut self,
            frame_idx: usize,
            instances: Vec<DetectionInstance>,
            _image: Option<&RgbImage>,
        ) -> Vec<DetectionInstance> {
            self.seen.push(frame_idx);
            instances
                .into_iter()
                .enumerate()
                .map(|(i, inst)| inst.with_track(i as u32))
                .collect()
        }

        fn reset(&mut self) {
            self.seen.clear();
        }

        fn track_count(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_track_sequence_feeds_frames_in_order() {
        let frames = vec![
            Frame::new(2, vec![inst(&[(0.0, 0.0)], 1.0)]),
            Frame::new(0, vec![]),
            Frame::new(1, vec![inst(&[(0.0, 0.0)], 1.0)]),
        ];
        let mut tracker = CountingTracker { seen: Vec::new() };
        let mut requested = Vec::new();
        let out = track_sequence(&mut tracker, frames, |idx| {
            requested.push(idx);
            Ok(None)
        })
        .unwrap();

        assert_eq!(tracker.seen, vec![0, 1, 2]);
        assert_eq!(requested, vec![0, 1, 2]);
        assert_eq!(out.iter().map(|f| f.frame_idx).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(out[2].instances[0].track, Some(0));
    }

    #[test]
    fn test_track_sequence_rejects_duplicate_frames() {
        let frames = vec![Frame::new(1, vec![]), Frame::new(1, vec![])];
        let mut tracker = CountingTracker { seen: Vec::new() };
        let err = track_sequence(&mut tracker, frames, |_| Ok(None)).unwrap_err();
        assert!(matches!(err, PipelineError::Tracking(_)));
    }
}
