// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频文件解码器
/// Video file decoder: probes geometry, then streams RGB frames in order
use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext};
use image::RgbImage;
use tracing::{debug, info};

use super::decode_filter::{DecodeFilter, DecodeMessage};
use crate::detection::VideoInfo;
use crate::error::{PipelineError, Result};

/// 已解码帧
#[derive(Clone)]
pub struct VideoFrame {
    /// 帧序号 (从0开始)
    pub index: usize,
    pub image: RgbImage,
}

/// 按顺序读取帧的视频流
pub trait VideoStream {
    fn info(&self) -> &VideoInfo;

    /// 下一帧, 结束时返回 None
    fn next_frame(&mut self) -> Result<Option<VideoFrame>>;
}

/// 视频源: 打开视频文件得到可顺序读取的帧流
pub trait VideoSource {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoStream>>;
}

/// 基于 ez-ffmpeg 的视频源 (CPU软件解码)
pub struct FfmpegVideoSource {
    /// 解码线程与消费方之间的缓冲帧数
    channel_capacity: usize,
}

impl FfmpegVideoSource {
    pub fn new() -> Self {
        Self {
            channel_capacity: 8,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for FfmpegVideoSource {
    fn default() -> Self {
        Self::new()
    }
}

/// 文件本身不可读 (不存在, 不是文件, 无权限) 属于不可恢复的解码错误
pub fn check_readable(path: &Path) -> Result<()> {
    let fail = |reason: String| PipelineError::Decode {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_file() {
        return Err(fail("文件不存在或不是普通文件".to_string()));
    }
    File::open(path).map_err(|e| fail(format!("无法打开: {}", e)))?;
    Ok(())
}

/// 读取视频几何信息
///
/// 文件不可读时返回 `Decode`; 容器/流信息无法解析时返回 `DecodeIndex`
pub fn probe(path: &Path) -> Result<VideoInfo> {
    check_readable(path)?;
    let url = path.to_string_lossy().into_owned();
    let info = find_video_stream_info(url)
        .map_err(|e| PipelineError::decode_index(path, format!("读取流信息失败: {}", e)))?
        .ok_or_else(|| PipelineError::decode_index(path, "没有视频流"))?;

    match info {
        StreamInfo::Video {
            width,
            height,
            nb_frames,
            fps,
            ..
        } => {
            if width <= 0 || height <= 0 {
                return Err(PipelineError::decode_index(
                    path,
                    format!("非法分辨率 {}x{}", width, height),
                ));
            }
            Ok(VideoInfo {
                frame_count: nb_frames.max(0) as usize,
                height: height as u32,
                width: width as u32,
                fps,
            })
        }
        _ => Err(PipelineError::decode_index(path, "没有视频流")),
    }
}

/// 解码线程: 构建FFmpeg上下文并阻塞直到解码结束
fn run_decoder(url: String, filter: DecodeFilter) -> std::result::Result<(), String> {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let ctx = FfmpegContext::builder()
        .input(url.as_str())
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
        .map_err(|e| format!("构建失败: {}", e))?;

    let sch = ctx.start().map_err(|e| format!("启动失败: {}", e))?;
    sch.wait().map_err(|e| format!("解码失败: {}", e))
}

impl VideoSource for FfmpegVideoSource {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoStream>> {
        let info = probe(path)?;
        info!(
            "🎬 打开视频 {} ({}x{}, {} 帧, {:.2} fps)",
            path.display(),
            info.width,
            info.height,
            info.frame_count,
            info.fps
        );

        let (tx, rx) = bounded::<DecodeMessage>(self.channel_capacity);
        let filter = DecodeFilter::new(tx);
        let url = path.to_string_lossy().into_owned();
        let handle = std::thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || run_decoder(url, filter))?;

        Ok(Box::new(FfmpegVideoStream {
            path: path.to_path_buf(),
            info,
            rx,
            handle: Some(handle),
            decoded: 0,
        }))
    }
}

/// 解码中的视频流
pub struct FfmpegVideoStream {
    path: PathBuf,
    info: VideoInfo,
    rx: Receiver<DecodeMessage>,
    handle: Option<JoinHandle<std::result::Result<(), String>>>,
    decoded: usize,
}

impl FfmpegVideoStream {
    /// 解码结束: 回收解码线程并检查结果
    fn finish(&mut self) -> Result<Option<VideoFrame>> {
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };

        match handle.join() {
            Ok(Ok(())) => {}
            // 构建/启动/运行失败: 帧索引类错误已由过滤器通过通道上报
            Ok(Err(reason)) => {
                return Err(PipelineError::Decode {
                    path: self.path.clone(),
                    reason,
                })
            }
            Err(_) => {
                return Err(PipelineError::Decode {
                    path: self.path.clone(),
                    reason: "解码线程异常退出".to_string(),
                })
            }
        }

        if self.decoded == 0 && self.info.frame_count > 0 {
            return Err(PipelineError::decode_index(
                &self.path,
                format!("声明 {} 帧, 但没有解码出任何帧", self.info.frame_count),
            ));
        }

        debug!("📺 {} 解码完成: {} 帧", self.path.display(), self.decoded);
        Ok(None)
    }
}

impl VideoStream for FfmpegVideoStream {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        match self.rx.recv() {
            Ok(Ok(frame)) => {
                self.decoded += 1;
                Ok(Some(frame))
            }
            Ok(Err(reason)) => Err(PipelineError::decode_index(&self.path, reason)),
            Err(_) => self.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_unreadable_input_is_not_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let err = probe(&missing).unwrap_err();
        assert!(!err.is_recoverable());
        assert_matches!(err, PipelineError::Decode { path, .. } if path == missing);

        // 目录不是视频文件
        assert_matches!(probe(dir.path()), Err(PipelineError::Decode { .. }));
    }

    #[test]
    fn test_open_unreadable_fails_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let result = FfmpegVideoSource::new().open(&dir.path().join("missing.mp4"));
        assert_matches!(result.err(), Some(PipelineError::Decode { .. }));
    }
}
