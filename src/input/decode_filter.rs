/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module: yuv420p frames → RGB images over a bounded channel
use crossbeam_channel::Sender;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{debug, warn};

use super::decoder::VideoFrame;

/// 解码线程 → 消费线程 的消息, Err 携带帧索引失败原因
pub type DecodeMessage = Result<VideoFrame, String>;

/// YUV420P 平面布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub width: usize,
    pub height: usize,
    pub y_stride: usize,
    pub uv_stride: usize,
}

impl PlaneLayout {
    fn chroma_width(&self) -> usize {
        self.width.div_ceil(2)
    }

    fn chroma_height(&self) -> usize {
        self.height.div_ceil(2)
    }

    /// 检查分辨率与步长
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("非法分辨率 {}x{}", self.width, self.height));
        }
        if self.y_stride < self.width || self.uv_stride < self.chroma_width() {
            return Err(format!(
                "步长异常 y_stride={} uv_stride={} ({}x{})",
                self.y_stride, self.uv_stride, self.width, self.height
            ));
        }
        Ok(())
    }

    /// 亮度平面至少需要的字节数
    pub fn y_len(&self) -> usize {
        self.y_stride * (self.height - 1) + self.width
    }

    /// 单个色度平面至少需要的字节数
    pub fn uv_len(&self) -> usize {
        self.uv_stride * (self.chroma_height() - 1) + self.chroma_width()
    }
}

/// YUV420P → RGB (BT.601), 平面长度不足时返回错误
pub fn yuv420p_to_rgb(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    layout: PlaneLayout,
) -> Result<RgbImage, String> {
    layout.validate()?;
    if y_plane.len() < layout.y_len()
        || u_plane.len() < layout.uv_len()
        || v_plane.len() < layout.uv_len()
    {
        return Err(format!(
            "YUV平面长度不足 y={} u={} v={}",
            y_plane.len(),
            u_plane.len(),
            v_plane.len()
        ));
    }

    let PlaneLayout {
        width: w,
        height: h,
        y_stride,
        uv_stride,
    } = layout;

    let mut rgb_data = vec![0u8; w * h * 3];
    for y in 0..h {
        for x in 0..w {
            let y_val = y_plane[y * y_stride + x] as f32;
            let u_val = u_plane[(y / 2) * uv_stride + x / 2] as f32 - 128.0;
            let v_val = v_plane[(y / 2) * uv_stride + x / 2] as f32 - 128.0;

            let idx = (y * w + x) * 3;
            rgb_data[idx] = (y_val + 1.402 * v_val).clamp(0.0, 255.0) as u8;
            rgb_data[idx + 1] = (y_val - 0.344 * u_val - 0.714 * v_val).clamp(0.0, 255.0) as u8;
            rgb_data[idx + 2] = (y_val + 1.772 * u_val).clamp(0.0, 255.0) as u8;
        }
    }

    RgbImage::from_raw(w as u32, h as u32, rgb_data)
        .ok_or_else(|| format!("RGB图像转换失败 {}x{}", w, h))
}

/// FFmpeg解码过滤器: 视频文件 → RGB帧 (按解码顺序编号)
pub struct DecodeFilter {
    tx: Option<Sender<DecodeMessage>>,
    frame_idx: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<DecodeMessage>) -> Self {
        Self {
            tx: Some(tx),
            frame_idx: 0,
        }
    }

    fn send(&self, msg: DecodeMessage) -> Result<(), String> {
        match &self.tx {
            // 接收端已关闭 (消费方提前结束), 停止解码
            Some(tx) => tx.send(msg).map_err(|_| "接收端已关闭".to_string()),
            None => Err("解码过滤器已关闭".to_string()),
        }
    }

    /// 帧不可用: 帧索引不可靠, 交给调用方决定是否转码重试
    fn reject(&self, reason: String) -> Result<Option<Frame>, String> {
        let reason = format!("帧 #{}: {}", self.frame_idx, reason);
        warn!("⚠️ {}", reason);
        self.send(Err(reason.clone()))?;
        Err(reason)
    }

    /// 从 AVFrame 中取出三个平面并转换
    unsafe fn convert(frame: &Frame) -> Result<RgbImage, String> {
        let av = &*frame.as_ptr();
        let layout = PlaneLayout {
            width: av.width.max(0) as usize,
            height: av.height.max(0) as usize,
            y_stride: av.linesize[0].max(0) as usize,
            uv_stride: av.linesize[1].max(0) as usize,
        };
        layout.validate()?;
        if av.linesize[2] != av.linesize[1] {
            return Err(format!(
                "色度步长不一致 u={} v={}",
                av.linesize[1], av.linesize[2]
            ));
        }

        let (y_ptr, u_ptr, v_ptr) = (av.data[0], av.data[1], av.data[2]);
        if y_ptr.is_null() || u_ptr.is_null() || v_ptr.is_null() {
            return Err("YUV指针为空".to_string());
        }

        let y_plane = std::slice::from_raw_parts(y_ptr as *const u8, layout.y_len());
        let u_plane = std::slice::from_raw_parts(u_ptr as *const u8, layout.uv_len());
        let v_plane = std::slice::from_raw_parts(v_ptr as *const u8, layout.uv_len());
        yuv420p_to_rgb(y_plane, u_plane, v_plane, layout)
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("✅ 解码过滤器启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() {
                return Ok(Some(frame));
            }

            if frame.is_corrupt() {
                return self.reject("已损坏".to_string());
            }

            // 缺少参考帧 / 无效比特流
            let decode_error_flags = (*frame.as_ptr()).decode_error_flags;
            if decode_error_flags & 0x03 != 0 {
                return self.reject(format!("解码错误标志=0x{:02x}", decode_error_flags));
            }

            let image = match Self::convert(&frame) {
                Ok(image) => image,
                Err(reason) => return self.reject(reason),
            };

            self.send(Ok(VideoFrame {
                index: self.frame_idx,
                image,
            }))?;
            self.frame_idx += 1;

            Ok(Some(frame))
        }
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!("✅ 解码过滤器退出, 共 {} 帧", self.frame_idx);
        // 关闭发送端, 通知消费方解码结束
        self.tx.take();
    }
}
