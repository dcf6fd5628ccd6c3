// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输出目录布局与预测结果持久化
//! Output layout and artifact persistence

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::detection::PredictionArtifact;
use crate::error::Result;

/// 预测结果文件扩展名
pub const ARTIFACT_EXTENSION: &str = ".json";

/// 输出根目录下的固定布局
///
/// ```text
/// <root>/predictions/<stem>.json
/// <root>/predictions/tracks/<stem>.json
/// <root>/csv_output/<stem>.csv
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// 默认输出目录: 视频目录的同级目录 `<video_dir>_output`
    pub fn for_video_dir(video_dir: &Path) -> Self {
        match (video_dir.parent(), video_dir.file_name()) {
            (Some(parent), Some(name)) => {
                Self::new(parent.join(format!("{}_output", name.to_string_lossy())))
            }
            _ => Self::new(video_dir.join("output")),
        }
    }

    pub fn predictions_dir(&self) -> PathBuf {
        self.root.join("predictions")
    }

    pub fn tracks_dir(&self) -> PathBuf {
        self.predictions_dir().join("tracks")
    }

    pub fn csv_dir(&self) -> PathBuf {
        self.root.join("csv_output")
    }

    pub fn artifact_path(&self, stem: &str) -> PathBuf {
        self.predictions_dir()
            .join(format!("{}{}", stem, ARTIFACT_EXTENSION))
    }

    pub fn tracked_artifact_path(&self, stem: &str) -> PathBuf {
        self.tracks_dir().join(format!("{}{}", stem, ARTIFACT_EXTENSION))
    }

    /// CSV 转换的来源目录: 开启追踪时使用追踪结果
    pub fn flatten_source(&self, tracking: bool) -> PathBuf {
        if tracking {
            self.tracks_dir()
        } else {
            self.predictions_dir()
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.tracks_dir())?;
        Ok(())
    }
}

pub fn save_artifact(artifact: &PredictionArtifact, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(artifact)?;
    fs::write(path, json)?;
    debug!("💾 已保存 {}", path.display());
    Ok(())
}

pub fn load_artifact(path: &Path) -> Result<PredictionArtifact> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// 删除 `dir` 下的普通文件 (不递归), 返回删除数量; 目录不存在时为 0
pub fn clear_dir_files(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
