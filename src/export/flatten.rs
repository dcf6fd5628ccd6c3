// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 预测结果 → CSV 表
//! Flattens prediction artifacts into one row per (frame, instance)

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::detection::{NodePoint, PredictionArtifact, Skeleton};
use crate::error::{PipelineError, Result};
use crate::input::discover;
use crate::pipeline::{load_artifact, ARTIFACT_EXTENSION};

/// 每行固定的前几列
pub const BASE_COLUMNS: [&str; 8] = [
    "video",
    "video_height",
    "video_width",
    "frame_idx",
    "instance_id",
    "instance_score",
    "fps",
    "track",
];

/// 表结构: 固定列 + 每个节点的 _x/_y(/_score) 列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatSchema {
    pub nodes: Vec<String>,
    pub node_scores: bool,
}

impl FlatSchema {
    pub fn from_skeleton(skeleton: &Skeleton) -> Self {
        Self {
            nodes: skeleton.nodes.clone(),
            node_scores: true,
        }
    }

    pub fn with_node_scores(mut self, enabled: bool) -> Self {
        self.node_scores = enabled;
        self
    }

    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        for node in &self.nodes {
            columns.push(format!("{}_x", node));
            columns.push(format!("{}_y", node));
            if self.node_scores {
                columns.push(format!("{}_score", node));
            }
        }
        columns
    }
}

/// 一个实例对应的一行
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    pub video: String,
    pub video_height: u32,
    pub video_width: u32,
    pub frame_idx: usize,
    /// 帧内序号 (从0开始)
    pub instance_id: usize,
    pub instance_score: f32,
    pub fps: f64,
    pub track: Option<u32>,
    pub nodes: Vec<Option<NodePoint>>,
}

impl FlatRow {
    /// 按表结构输出字段, 缺失值为空字段
    pub fn fields(&self, schema: &FlatSchema) -> Vec<String> {
        let mut fields = vec![
            self.video.clone(),
            self.video_height.to_string(),
            self.video_width.to_string(),
            self.frame_idx.to_string(),
            self.instance_id.to_string(),
            self.instance_score.to_string(),
            self.fps.to_string(),
            self.track.map(|t| t.to_string()).unwrap_or_default(),
        ];
        for i in 0..schema.nodes.len() {
            match self.nodes.get(i).copied().flatten() {
                Some(p) => {
                    fields.push(p.x.to_string());
                    fields.push(p.y.to_string());
                    if schema.node_scores {
                        fields.push(p.score.to_string());
                    }
                }
                None => {
                    fields.push(String::new());
                    fields.push(String::new());
                    if schema.node_scores {
                        fields.push(String::new());
                    }
                }
            }
        }
        fields
    }
}

/// 一个视频的完整表
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTable {
    pub schema: FlatSchema,
    pub rows: Vec<FlatRow>,
}

impl FlatTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.schema.columns())?;
        for row in &self.rows {
            wtr.write_record(row.fields(&self.schema))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.write_csv(fs::File::create(path)?)
    }
}

#[derive(Debug, Clone)]
pub struct ResultFlattener {
    node_scores: bool,
}

impl Default for ResultFlattener {
    fn default() -> Self {
        Self { node_scores: true }
    }
}

impl ResultFlattener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_scores(mut self, enabled: bool) -> Self {
        self.node_scores = enabled;
        self
    }

    /// 没有骨架节点或没有任何实例时返回诊断信息
    pub fn diagnose(artifact: &PredictionArtifact) -> Option<PipelineError> {
        if artifact.skeleton.is_empty() || artifact.instance_count() == 0 {
            Some(PipelineError::MissingSkeletonData(
                artifact.video.display().to_string(),
            ))
        } else {
            None
        }
    }

    /// 帧与实例均按存储顺序展开, 不重新排序
    pub fn flatten(&self, artifact: &PredictionArtifact) -> FlatTable {
        if let Some(diag) = Self::diagnose(artifact) {
            warn!("⚠️ {}", diag);
        }

        let schema = FlatSchema::from_skeleton(&artifact.skeleton).with_node_scores(self.node_scores);
        let video = artifact.decoded_from.display().to_string();

        let mut rows = Vec::with_capacity(artifact.instance_count());
        for frame in &artifact.frames {
            for (instance_id, instance) in frame.instances.iter().enumerate() {
                rows.push(FlatRow {
                    video: video.clone(),
                    video_height: artifact.info.height,
                    video_width: artifact.info.width,
                    frame_idx: frame.frame_idx,
                    instance_id,
                    instance_score: instance.score,
                    fps: artifact.info.fps,
                    track: instance.track,
                    nodes: instance.points.clone(),
                });
            }
        }

        FlatTable { schema, rows }
    }

    /// 把 `slp_dir` 下每个预测结果转换为 `csv_dir/<stem>.csv`
    pub fn convert_directory(&self, slp_dir: &Path, csv_dir: &Path) -> Result<Vec<PathBuf>> {
        info!("📄 转换为CSV: {} → {}", slp_dir.display(), csv_dir.display());
        let files = discover(slp_dir, ARTIFACT_EXTENSION)?;
        fs::create_dir_all(csv_dir)?;

        let mut written = Vec::with_capacity(files.len());
        for file in &files {
            let artifact = load_artifact(&file.path)?;
            let table = self.flatten(&artifact);
            let path = csv_dir.join(format!("{}.csv", file.stem()));
            table.save(&path)?;
            info!("✅ {} ({} 行)", path.display(), table.len());
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionInstance, Frame, VideoInfo};
    use crate::pipeline::save_artifact;
    use assert_matches::assert_matches;

    fn artifact(instances_per_frame: &[usize]) -> PredictionArtifact {
        let frames = instances_per_frame
            .iter()
            .enumerate()
            .map(|(f, &k)| {
                let instances = (0..k)
                    .map(|i| {
                        DetectionInstance::new(
                            vec![Some(NodePoint::new(i as f32, f as f32, 0.5)), None],
                            0.75,
                        )
                    })
                    .collect();
                Frame::new(f * 2, instances)
            })
            .collect();
        PredictionArtifact::new(
            "videos/clip.mp4".into(),
            "videos/fixedclip.mp4".into(),
            VideoInfo { frame_count: 10, height: 480, width: 640, fps: 30.0 },
            Skeleton::new(["head", "tail"]),
            frames,
        )
    }

    #[test]
    fn test_schema_columns() {
        let schema = FlatSchema::from_skeleton(&Skeleton::new(["head", "tail"]));
        let cols = schema.columns();
        assert_eq!(&cols[..8], &BASE_COLUMNS.map(String::from));
        assert_eq!(
            &cols[8..],
            &["head_x", "head_y", "head_score", "tail_x", "tail_y", "tail_score"]
        );
        assert_eq!(schema.with_node_scores(false).columns().len(), 12);
    }

    #[test]
    fn test_one_row_per_instance_in_stored_order() {
        let table = ResultFlattener::new().flatten(&artifact(&[2, 0, 3]));
        assert_eq!(table.len(), 5);

        let keys: Vec<(usize, usize)> = table.rows.iter().map(|r| (r.frame_idx, r.instance_id)).collect();
        assert_eq!(keys, vec![(0, 0), (0, 1), (4, 0), (4, 1), (4, 2)]);

        let row = &table.rows[0];
        assert_eq!(row.video, "videos/fixedclip.mp4");
        assert_eq!((row.video_height, row.video_width), (480, 640));
        assert_eq!(row.fps, 30.0);
        assert_eq!(row.track, None);
    }

    #[test]
    fn test_every_row_has_every_column() {
        let table = ResultFlattener::new().flatten(&artifact(&[1, 2]));
        let width = table.schema.columns().len();
        for row in &table.rows {
            let fields = row.fields(&table.schema);
            assert_eq!(fields.len(), width);
            // 缺失节点为空字段
            assert_eq!(&fields[11..], &["", "", ""]);
        }
    }

    #[test]
    fn test_missing_skeleton_data_still_yields_table() {
        let empty = artifact(&[0, 0]);
        assert_matches!(
            ResultFlattener::diagnose(&empty),
            Some(PipelineError::MissingSkeletonData(_))
        );
        let table = ResultFlattener::new().flatten(&empty);
        assert!(table.is_empty());

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("video,video_height,video_width,frame_idx"));
    }

    #[test]
    fn test_convert_directory() {
        let dir = tempfile::tempdir().unwrap();
        let slp = dir.path().join("predictions");
        let csv_dir = dir.path().join("csv_output");
        save_artifact(&artifact(&[1, 2]), &slp.join("clip.json")).unwrap();
        save_artifact(&artifact(&[3]), &slp.join("other.JSON")).unwrap();
        fs::create_dir_all(slp.join("tracks")).unwrap();

        let written = ResultFlattener::new().convert_directory(&slp, &csv_dir).unwrap();
        assert_eq!(written, vec![csv_dir.join("clip.csv"), csv_dir.join("other.csv")]);

        let mut rdr = csv::Reader::from_path(csv_dir.join("clip.csv")).unwrap();
        assert_eq!(rdr.headers().unwrap().len(), 14);
        let records: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[2][3], "2");
        assert_eq!(&records[2][4], "1");
        assert_eq!(&records[2][7], "");
    }

    #[test]
    fn test_convert_directory_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            ResultFlattener::new().convert_directory(dir.path(), &dir.path().join("csv")),
            Err(PipelineError::NoMatchingFiles { .. })
        );
    }
}
