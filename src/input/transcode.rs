// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频转码修复
//! Re-encodes a video whose frame index could not be built

use std::fs;
use std::path::{Path, PathBuf};

use ez_ffmpeg::{FfmpegContext, Output};
use tracing::info;

use crate::error::{PipelineError, Result};

const FIXED_PREFIX: &str = "fixed";

/// 转码器: 把 `src` 重新编码为 `dst`
pub trait Transcoder {
    fn transcode(&self, src: &Path, dst: &Path) -> Result<()>;
}

/// 修复后的视频路径: 同目录, 文件名加 `fixed` 前缀
pub fn fixed_video_path(original: &Path) -> PathBuf {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fixed = format!("{}{}", FIXED_PREFIX, name);
    match original.parent() {
        Some(dir) => dir.join(fixed),
        None => PathBuf::from(fixed),
    }
}

/// 修复副本 `fixed<name>` 对应的原文件名, 不是修复副本时返回 None
pub fn repaired_original(name: &str) -> Option<&str> {
    name.strip_prefix(FIXED_PREFIX).filter(|rest| !rest.is_empty())
}

/// 基于 ez-ffmpeg 的转码器 (默认 libx264 / yuv420p / superfast / crf 23)
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    pub video_codec: String,
    pub pix_fmt: String,
    pub preset: String,
    pub crf: u32,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            pix_fmt: "yuv420p".to_string(),
            preset: "superfast".to_string(),
            crf: 23,
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, src: &Path, dst: &Path) -> Result<()> {
        let fail = |reason: String| PipelineError::Transcode {
            path: src.to_path_buf(),
            reason,
        };

        // 目标已存在时覆盖
        if dst.exists() {
            fs::remove_file(dst)?;
        }

        info!(
            "🔧 转码 {} → {} ({}, {}, preset={}, crf={})",
            src.display(),
            dst.display(),
            self.video_codec,
            self.pix_fmt,
            self.preset,
            self.crf
        );

        let output = Output::from(dst.to_string_lossy().into_owned())
            .set_video_codec(self.video_codec.as_str())
            .set_video_codec_opt("preset", self.preset.as_str())
            .set_video_codec_opt("crf", self.crf.to_string());

        let ctx = FfmpegContext::builder()
            .input(src.to_string_lossy().into_owned())
            .filter_desc(format!("format={}", self.pix_fmt))
            .output(output)
            .build()
            .map_err(|e| fail(format!("构建失败: {}", e)))?;

        ctx.start()
            .map_err(|e| fail(format!("启动失败: {}", e)))?
            .wait()
            .map_err(|e| fail(format!("转码失败: {}", e)))?;

        if !dst.is_file() {
            return Err(fail("没有生成输出文件".to_string()));
        }
        info!("✅ 转码完成: {}", dst.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_video_path() {
        assert_eq!(
            fixed_video_path(Path::new("/data/videos/clip.MP4")),
            PathBuf::from("/data/videos/fixedclip.MP4")
        );
        assert_eq!(fixed_video_path(Path::new("a.mp4")), PathBuf::from("fixeda.mp4"));
    }

    #[test]
    fn test_repaired_original() {
        assert_eq!(repaired_original("fixedclip.MP4"), Some("clip.MP4"));
        assert_eq!(repaired_original("clip.mp4"), None);
        assert_eq!(repaired_original("fixed"), None);

        let fixed = fixed_video_path(Path::new("videos/a.mp4"));
        let name = fixed.file_name().unwrap().to_str().unwrap();
        assert_eq!(repaired_original(name), Some("a.mp4"));
    }

    #[test]
    fn test_default_encoding_settings() {
        let t = FfmpegTranscoder::default();
        assert_eq!(t.video_codec, "libx264");
        assert_eq!(t.pix_fmt, "yuv420p");
        assert_eq!(t.preset, "superfast");
        assert_eq!(t.crf, 23);
    }
}
