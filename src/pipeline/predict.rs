// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 批量预测流水线
//! Batch prediction: discovery → inference (+ transcode retry) → tracking → persistence

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::{info, warn};

use super::store::{clear_dir_files, save_artifact, OutputLayout};
use crate::config::ResetPolicy;
use crate::detection::{track_sequence, PredictionArtifact, TrackerBuilder};
use crate::error::{PipelineError, Result};
use crate::input::{
    discover, fixed_video_path, repaired_original, Transcoder, VideoFile, VideoFrame, VideoSource,
    VideoStream,
};
use crate::models::Predictor;

/// 被跳过的视频 (转码重试后仍无法建立帧索引)
#[derive(Debug)]
pub struct SkippedVideo {
    pub video: PathBuf,
    pub reason: PipelineError,
}

/// 一次 `predict` 的结果汇总
#[derive(Debug, Default)]
pub struct PredictSummary {
    pub started_at: String,
    /// 未追踪的预测结果文件
    pub artifacts: Vec<PathBuf>,
    /// 追踪后的预测结果文件
    pub tracked: Vec<PathBuf>,
    pub skipped: Vec<SkippedVideo>,
}

/// 单个视频的推理结果
#[derive(Debug)]
pub enum InferOutcome {
    Predicted(PredictionArtifact),
    /// 转码重试后仍然是帧索引错误
    Skipped(PipelineError),
}

/// 去掉之前运行留下的修复副本: `fixed<name>` 且 `<name>` 也在列表中
pub fn skip_repaired_copies(videos: Vec<VideoFile>) -> Vec<VideoFile> {
    let names: HashSet<String> = videos.iter().map(|v| v.name.clone()).collect();
    videos
        .into_iter()
        .filter(|video| match repaired_original(&video.name) {
            Some(original) if names.contains(original) => {
                info!("⏭️ 跳过修复副本 {} (原视频 {})", video.name, original);
                false
            }
            _ => true,
        })
        .collect()
}

/// 按帧序号递增读取帧图像
struct FrameCursor {
    stream: Box<dyn VideoStream>,
    pending: Option<VideoFrame>,
}

impl FrameCursor {
    fn image_at(&mut self, frame_idx: usize) -> Result<Option<RgbImage>> {
        loop {
            let frame = match self.pending.take() {
                Some(frame) => frame,
                None => match self.stream.next_frame()? {
                    Some(frame) => frame,
                    None => return Ok(None),
                },
            };
            if frame.index == frame_idx {
                return Ok(Some(frame.image));
            }
            if frame.index > frame_idx {
                // 该帧没有图像, 留给后续帧
                self.pending = Some(frame);
                return Ok(None);
            }
        }
    }
}

pub struct PredictionPipeline {
    video_dir: PathBuf,
    extension: String,
    layout: OutputLayout,
    reset: ResetPolicy,
    source: Box<dyn VideoSource>,
    predictor: Box<dyn Predictor>,
    transcoder: Box<dyn Transcoder>,
    tracker_builder: Box<dyn TrackerBuilder>,
}

impl PredictionPipeline {
    pub fn new(
        video_dir: PathBuf,
        layout: OutputLayout,
        source: Box<dyn VideoSource>,
        predictor: Box<dyn Predictor>,
        transcoder: Box<dyn Transcoder>,
        tracker_builder: Box<dyn TrackerBuilder>,
    ) -> Self {
        Self {
            video_dir,
            extension: ".mp4".to_string(),
            layout,
            reset: ResetPolicy::default(),
            source,
            predictor,
            transcoder,
            tracker_builder,
        }
    }

    pub fn with_reset_policy(mut self, reset: ResetPolicy) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// 删除预测结果目录下的文件 (不递归)
    pub fn reset_output_area(&self) -> Result<usize> {
        let removed = clear_dir_files(&self.layout.predictions_dir())?;
        if removed > 0 {
            info!("🧹 已清空 {} 个旧预测结果", removed);
        }
        Ok(removed)
    }

    /// 对目录中的所有视频做推理, 可选追踪, 保存结果
    pub fn predict(
        &mut self,
        expected_instance_count: usize,
        enable_tracking: bool,
    ) -> Result<PredictSummary> {
        let mut summary = PredictSummary {
            started_at: crate::gen_time_string("-"),
            ..Default::default()
        };

        let videos = skip_repaired_copies(discover(&self.video_dir, &self.extension)?);
        self.layout.ensure()?;

        if self.reset == ResetPolicy::PerRun {
            self.reset_output_area()?;
            clear_dir_files(&self.layout.tracks_dir())?;
        }

        for (i, video) in videos.iter().enumerate() {
            info!("🎬 [{}/{}] {}", i + 1, videos.len(), video.name);

            let artifact = match self.infer_with_recovery(video)? {
                InferOutcome::Predicted(artifact) => artifact,
                InferOutcome::Skipped(reason) => {
                    warn!("⏭️ 无法修复 {}, 继续下一个视频", video.name);
                    summary.skipped.push(SkippedVideo {
                        video: video.path.clone(),
                        reason,
                    });
                    continue;
                }
            };

            if self.reset == ResetPolicy::PerVideo {
                self.reset_output_area()?;
            }

            let path = self.layout.artifact_path(video.stem());
            save_artifact(&artifact, &path)?;
            info!(
                "💾 {}: {} 帧, {} 个实例 → {}",
                video.name,
                artifact.frames.len(),
                artifact.instance_count(),
                path.display()
            );
            summary.artifacts.push(path);

            if enable_tracking {
                let tracked = self.track_artifact(&artifact, expected_instance_count)?;
                let path = self.layout.tracked_artifact_path(video.stem());
                save_artifact(&tracked, &path)?;
                info!("🎯 {}: {} 条轨迹 → {}", video.name, tracked.tracks.len(), path.display());
                summary.tracked.push(path);
            }
        }

        info!(
            "✅ 预测完成: {} 个视频, {} 个跳过",
            summary.artifacts.len(),
            summary.skipped.len()
        );
        Ok(summary)
    }

    /// 推理; 帧索引失败时转码并只重试一次
    pub fn infer_with_recovery(&mut self, video: &VideoFile) -> Result<InferOutcome> {
        match self.run_inference(&video.path, &video.path) {
            Ok(artifact) => Ok(InferOutcome::Predicted(artifact)),
            Err(e) if e.is_recoverable() => {
                warn!("⚠️ {}, 尝试转码修复", e);
                let fixed = fixed_video_path(&video.path);
                self.transcoder.transcode(&video.path, &fixed)?;

                match self.run_inference(&video.path, &fixed) {
                    Ok(artifact) => Ok(InferOutcome::Predicted(artifact)),
                    Err(e) if e.is_recoverable() => {
                        warn!("⚠️ 转码后仍然失败: {}", e);
                        Ok(InferOutcome::Skipped(e))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn run_inference(&mut self, video: &Path, decoded_from: &Path) -> Result<PredictionArtifact> {
        let mut stream = self.source.open(decoded_from)?;
        let frames = self.predictor.infer(stream.as_mut())?;

        let mut info = *stream.info();
        info.frame_count = info.frame_count.max(frames.len());

        let artifact = PredictionArtifact::new(
            video.to_path_buf(),
            decoded_from.to_path_buf(),
            info,
            self.predictor.skeleton().clone(),
            frames,
        );
        if !artifact.is_consistent() {
            return Err(PipelineError::Inference(format!(
                "{}: 实例关键点数与骨架 ({} 个节点) 不一致",
                video.display(),
                artifact.skeleton.len()
            )));
        }
        Ok(artifact)
    }

    /// 清除原有追踪后重新追踪, 帧图像从实际解码的文件重新读取
    pub fn track_artifact(
        &self,
        artifact: &PredictionArtifact,
        expected_instance_count: usize,
    ) -> Result<PredictionArtifact> {
        let mut tracked = artifact.clone();
        tracked.strip_tracks();

        let mut tracker = self.tracker_builder.build(expected_instance_count);
        let mut cursor = FrameCursor {
            stream: self.source.open(&artifact.decoded_from)?,
            pending: None,
        };

        let frames = std::mem::take(&mut tracked.frames);
        tracked.frames = track_sequence(tracker.as_mut(), frames, |idx| cursor.image_at(idx))?;
        tracked.rebuild_track_registry();
        Ok(tracked)
    }
}
