/// 视频输入系统 (Video Input System)
///
/// - discover:      目录扫描与扩展名匹配
/// - decoder:       VideoSource / VideoStream 接口与 FFmpeg 文件解码器
/// - decode_filter: 帧过滤器 (yuv420p → RGB, 通过有界通道交给消费方)
/// - transcode:     损坏视频的转码修复
pub mod decode_filter;
pub mod decoder;
pub mod discover;
pub mod transcode;

pub use decode_filter::DecodeFilter;
pub use decoder::{probe, FfmpegVideoSource, VideoFrame, VideoSource, VideoStream};
pub use discover::{discover, has_extension, VideoFile};
pub use transcode::{fixed_video_path, repaired_original, FfmpegTranscoder, Transcoder};
