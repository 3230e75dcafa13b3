use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::ClipError;
use crate::metadata::{SegmentWindow, TransformSpec};

/// 编码参数，只影响编码速度和画质，不影响切分逻辑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeParams {
    /// 视频编码器
    pub codec: String,
    /// 音频编码器
    pub audio_codec: String,
    /// 输出帧率（为空时沿用源视频帧率）
    pub frame_rate: Option<f64>,
    /// 编码速度预设
    pub preset: String,
    /// 编码线程数（为空时由 ffmpeg 自行决定）
    pub threads: Option<u32>,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            frame_rate: None,
            preset: "medium".to_string(),
            threads: None,
        }
    }
}

/// 片段提取能力：给定源视频、时间窗口、变换参数和编码参数，产出一个可播放的片段
pub trait Extractor {
    fn extract(
        &self,
        source: &Path,
        window: &SegmentWindow,
        transform: &TransformSpec,
        params: &EncodeParams,
    ) -> Result<Vec<u8>, ClipError>;
}

/// 调用 ffmpeg 命令行完成裁剪、缩放和编码
pub struct FfmpegExtractor {
    /// 临时片段所在目录
    work_dir: PathBuf,
    ffmpeg_bin: String,
}

impl FfmpegExtractor {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            ffmpeg_bin: "ffmpeg".to_string(),
        }
    }

    /// 指定 ffmpeg 可执行文件
    pub fn with_binary(mut self, ffmpeg_bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = ffmpeg_bin.into();
        self
    }

    /// 构建 ffmpeg 参数
    pub fn build_args(
        source: &Path,
        window: &SegmentWindow,
        transform: &TransformSpec,
        params: &EncodeParams,
        output: &Path,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-ss".into(),
            format!("{:.3}", window.start),
            "-t".into(),
            format!("{:.3}", window.duration()),
            "-i".into(),
            source.to_string_lossy().to_string(),
            "-vf".into(),
            transform.to_filter(),
            "-c:v".into(),
            params.codec.clone(),
            "-preset".into(),
            params.preset.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ];

        if let Some(frame_rate) = params.frame_rate {
            args.push("-r".into());
            args.push(format!("{}", frame_rate));
        }
        if let Some(threads) = params.threads {
            args.push("-threads".into());
            args.push(threads.to_string());
        }

        args.extend([
            "-c:a".to_string(),
            params.audio_codec.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
        ]);
        args.push(output.to_string_lossy().to_string());

        args
    }
}

impl Extractor for FfmpegExtractor {
    fn extract(
        &self,
        source: &Path,
        window: &SegmentWindow,
        transform: &TransformSpec,
        params: &EncodeParams,
    ) -> Result<Vec<u8>, ClipError> {
        let start = Instant::now();

        // 临时片段在离开作用域时自动删除，成功和失败都一样
        let artifact = tempfile::Builder::new()
            .prefix(&format!("short-{:02}-", window.index))
            .suffix(".mp4")
            .tempfile_in(&self.work_dir)?;

        let args = Self::build_args(source, window, transform, params, artifact.path());
        debug!("🎞️  [片段提取] {} {}", self.ffmpeg_bin, args.join(" "));

        let output = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .output()
            .map_err(ClipError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ClipError::encode(output.status.code(), stderr));
        }

        let bytes = std::fs::read(artifact.path())?;
        if bytes.is_empty() {
            return Err(ClipError::EmptyOutput);
        }

        info!(
            "✅ [片段提取] 片段 #{} 完成 ({:.2}s-{:.2}s, {} 字节)，耗时: {:.2}秒",
            window.index,
            window.start,
            window.end,
            bytes.len(),
            start.elapsed().as_secs_f64()
        );

        Ok(bytes)
    }
}
