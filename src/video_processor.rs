use ffmpeg_next as ffmpeg;
use image::{DynamicImage, GrayImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ShortsError;
use crate::metadata::VideoMeta;

/// 获取不到帧率时使用的默认值
const FALLBACK_FRAME_RATE: f64 = 30.0;

/// 媒体探测接口，便于在测试中替换成假实现
pub trait MediaProbe {
    fn probe(&self, path: &Path) -> Result<VideoMeta, ShortsError>;
}

/// 视频处理器，负责读取视频信息和解码帧
pub struct VideoProcessor {
    input_path: PathBuf,
}

impl VideoProcessor {
    pub fn new(input_path: impl AsRef<Path>) -> Result<Self, ShortsError> {
        init_ffmpeg()?;
        Ok(Self {
            input_path: input_path.as_ref().to_path_buf(),
        })
    }

    /// 获取视频信息（时长、帧率、分辨率）
    pub fn get_video_info(&self) -> Result<VideoMeta, ShortsError> {
        let ictx = ffmpeg::format::input(&self.input_path)
            .map_err(|e| ShortsError::Probe(format!("无法打开视频文件: {}", e)))?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| ShortsError::Probe("未找到视频流".to_string()))?;

        let decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| ShortsError::Probe(format!("无法创建视频解码器: {}", e)))?;

        let frame_rate = rational_to_f64(video_stream.avg_frame_rate())
            .or_else(|| rational_to_f64(video_stream.rate()))
            .unwrap_or(FALLBACK_FRAME_RATE);

        // 优先使用容器时长，缺失时用视频流时长换算
        let container_duration = ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
        let duration = if container_duration > 0.0 {
            container_duration
        } else {
            let stream_duration = video_stream.duration();
            let time_base = rational_to_f64(video_stream.time_base()).unwrap_or(0.0);
            if stream_duration > 0 {
                stream_duration as f64 * time_base
            } else {
                0.0
            }
        };

        let meta = VideoMeta {
            duration,
            frame_rate,
            width: decoder.width(),
            height: decoder.height(),
        };
        debug!(
            "📼 [媒体探测] {}: {:.2}秒, {:.2} fps, {}",
            self.input_path.display(),
            meta.duration,
            meta.frame_rate,
            meta.resolution()
        );

        Ok(meta)
    }

    /// 打开逐帧解码的灰度帧流
    pub fn frames(&self) -> Result<FrameStream, ShortsError> {
        FrameStream::open(&self.input_path)
    }
}

/// 基于 ffmpeg 库的媒体探测
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegProbe;

impl MediaProbe for FfmpegProbe {
    fn probe(&self, path: &Path) -> Result<VideoMeta, ShortsError> {
        VideoProcessor::new(path)?.get_video_info()
    }
}

/// 惰性、有限、不可重放的解码帧序列，每一帧都已转换为 8 位亮度图
pub struct FrameStream {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    /// 已经向解码器发送 EOF，正在取出缓存的帧
    draining: bool,
    finished: bool,
}

impl FrameStream {
    fn open(path: &Path) -> Result<Self, ShortsError> {
        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| ShortsError::Probe(format!("无法打开视频文件: {}", e)))?;

        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| ShortsError::Probe("未找到视频流".to_string()))?;
        let stream_index = stream.index();

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| ShortsError::Decode(format!("无法创建视频解码器: {}", e)))?;

        let scaler = gray_scaler(decoder.format(), decoder.width(), decoder.height())?;

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            draining: false,
            finished: false,
        })
    }

    fn to_image(&mut self, decoded: &ffmpeg::frame::Video) -> Result<DynamicImage, ShortsError> {
        // 流中途换分辨率时重建缩放器，评分器会把这一帧当作新的参考帧
        let input = self.scaler.input();
        if (input.format, input.width, input.height)
            != (decoded.format(), decoded.width(), decoded.height())
        {
            debug!(
                "🔁 [帧解码] 帧尺寸变化: {}x{} -> {}x{}",
                input.width,
                input.height,
                decoded.width(),
                decoded.height()
            );
            self.scaler = gray_scaler(decoded.format(), decoded.width(), decoded.height())?;
        }

        let mut gray_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut gray_frame)
            .map_err(|e| ShortsError::Decode(format!("帧格式转换失败: {}", e)))?;

        let width = gray_frame.width() as usize;
        let height = gray_frame.height() as usize;
        let stride = gray_frame.stride(0);
        let data = gray_frame.data(0);

        // 去掉每行末尾的对齐填充
        let mut pixels = Vec::with_capacity(width * height);
        for row in 0..height {
            let offset = row * stride;
            let line = data
                .get(offset..offset + width)
                .ok_or_else(|| ShortsError::Decode("帧数据长度不足".to_string()))?;
            pixels.extend_from_slice(line);
        }

        GrayImage::from_raw(width as u32, height as u32, pixels)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| ShortsError::Decode("无法构建灰度图".to_string()))
    }
}

impl Iterator for FrameStream {
    type Item = Result<DynamicImage, ShortsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let mut decoded = ffmpeg::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let image = self.to_image(&decoded);
                    if image.is_err() {
                        self.finished = true;
                    }
                    return Some(image);
                }
                Err(ffmpeg::Error::Eof) => {
                    self.finished = true;
                    return None;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    if self.draining {
                        self.finished = true;
                        return None;
                    }
                }
                Err(e) if self.draining => {
                    warn!("⚠️  [帧解码] 刷新解码器时出错，结束帧流: {}", e);
                    self.finished = true;
                    return None;
                }
                // 损坏的帧跳过，继续送包
                Err(e) => {
                    warn!("⚠️  [帧解码] 解码帧失败，跳过: {}", e);
                }
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        warn!("⚠️  [帧解码] 发送数据包失败，跳过: {}", e);
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    if let Err(e) = self.decoder.send_eof() {
                        warn!("⚠️  [帧解码] 刷新解码器失败: {}", e);
                    }
                    self.draining = true;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(ShortsError::Decode(format!("读取数据包失败: {}", e))));
                }
            }
        }
    }
}

/// 输出单通道亮度、尺寸不变的缩放器
fn gray_scaler(
    format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
) -> Result<ffmpeg::software::scaling::Context, ShortsError> {
    ffmpeg::software::scaling::Context::get(
        format,
        width,
        height,
        ffmpeg::format::Pixel::GRAY8,
        width,
        height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| ShortsError::Decode(format!("无法创建缩放器: {}", e)))
}

fn init_ffmpeg() -> Result<(), ShortsError> {
    ffmpeg::init().map_err(|e| ShortsError::Probe(format!("初始化 FFmpeg 失败: {}", e)))?;
    // 只保留错误级别的日志
    ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    Ok(())
}

fn rational_to_f64(rational: ffmpeg::Rational) -> Option<f64> {
    if rational.numerator() > 0 && rational.denominator() > 0 {
        Some(rational.numerator() as f64 / rational.denominator() as f64)
    } else {
        None
    }
}
