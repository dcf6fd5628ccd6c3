// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输入文件发现
//! Directory listing with case-insensitive extension matching

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{PipelineError, Result};

/// 发现的输入文件 (视频或预测结果)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub path: PathBuf,
    /// 文件名 (含扩展名)
    pub name: String,
    /// 磁盘上的实际扩展名 (保留大小写, 含 '.')
    pub extension: String,
}

impl VideoFile {
    /// 去掉扩展名后的文件名, 用作输出文件名
    pub fn stem(&self) -> &str {
        &self.name[..self.name.len() - self.extension.len()]
    }
}

/// 不区分大小写的后缀匹配
pub fn has_extension(name: &str, extension: &str) -> bool {
    name.len() >= extension.len()
        && name.is_char_boundary(name.len() - extension.len())
        && name[name.len() - extension.len()..].eq_ignore_ascii_case(extension)
}

/// 列出 `dir` 下扩展名为 `extension` 的文件 (不区分大小写, 按文件名排序)
///
/// `dir` 不是目录时返回 `NotFound`, 没有匹配文件时返回 `NoMatchingFiles`
pub fn discover<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<VideoFile>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(PipelineError::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if has_extension(&name, extension) {
            let ext = name[name.len() - extension.len()..].to_string();
            files.push(VideoFile {
                path: entry.path(),
                name,
                extension: ext,
            });
        }
    }

    if files.is_empty() {
        return Err(PipelineError::NoMatchingFiles {
            extension: extension.to_string(),
            dir: dir.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    info!("📂 在 {} 中找到 {} 个 {} 文件", dir.display(), files.len(), extension);
    Ok(files)
}
