use base64::engine::general_purpose::STANDARD as base64_engine;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::metadata::{ClipLabel, HighlightRange, ProcessingReport};
use crate::processor::HighlightOutput;

/// 视频输入：base64 内容或可下载的 URL，二选一
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInput {
    /// base64 编码的视频内容
    pub video_base64: Option<String>,
    /// 视频下载地址
    pub video_url: Option<String>,
}

/// `POST /process_video` 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct ShortsRequestBody {
    #[serde(flatten)]
    pub input: VideoInput,
    /// 需要生成的短视频数量，超出 `[1, max_shorts]` 时按边界处理
    pub num_shorts: Option<i64>,
    /// 每个短视频的长度（秒）
    pub clip_length: Option<f64>,
    /// 视频时长提示（秒）
    pub duration_hint: Option<f64>,
}

/// `POST /detect_highlights` 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct HighlightsRequestBody {
    #[serde(flatten)]
    pub input: VideoInput,
    /// 高光阈值
    pub threshold: Option<f64>,
    /// 合并相邻高光点的最大间隔（秒）
    pub merge_gap: Option<f64>,
}

/// 单个短视频
#[derive(Debug, Clone, Serialize)]
pub struct ClipPayload {
    /// base64 编码的 mp4
    pub file_base64: String,
    /// 展示标签
    #[serde(rename = "type")]
    pub label: ClipLabel,
    /// 在源视频中的开始时间（秒）
    pub timestamp: f64,
    /// 片段时长（秒）
    pub duration: f64,
    /// 片段序号
    pub index: usize,
}

/// `POST /process_video` 响应体
#[derive(Debug, Clone, Serialize)]
pub struct ShortsResponse {
    pub success: bool,
    pub clips: Vec<ClipPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_duration: Option<f64>,
    pub clips_created: usize,
    /// 片段级诊断信息，成功时也会返回
    pub diagnostics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShortsResponse {
    pub fn from_report(report: &ProcessingReport) -> Self {
        let clips = report
            .clips
            .iter()
            .map(|clip| ClipPayload {
                file_base64: base64_engine.encode(&clip.bytes),
                label: clip.label(),
                timestamp: clip.window.start,
                duration: clip.window.duration(),
                index: clip.window.index,
            })
            .collect();

        Self {
            success: report.success(),
            clips,
            original_duration: Some(report.original_duration),
            clips_created: report.clips_created(),
            diagnostics: report.diagnostics(),
            error: (!report.success()).then(|| "没有成功生成任何短视频".to_string()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            clips: Vec::new(),
            original_duration: None,
            clips_created: 0,
            diagnostics: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// 单个高光点
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HighlightEntry {
    pub timestamp: f64,
    pub score: f64,
}

/// `POST /detect_highlights` 响应体
#[derive(Debug, Clone, Serialize)]
pub struct HighlightsResponse {
    pub success: bool,
    pub highlights: Vec<HighlightEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<HighlightRange>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HighlightsResponse {
    pub fn from_output(output: HighlightOutput) -> Self {
        Self {
            success: true,
            highlights: output
                .points
                .iter()
                .map(|p| HighlightEntry {
                    timestamp: p.timestamp,
                    score: p.score,
                })
                .collect(),
            ranges: output.ranges,
            width: Some(output.meta.width),
            height: Some(output.meta.height),
            frame_rate: Some(output.meta.frame_rate),
            threshold: Some(output.threshold),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            highlights: Vec::new(),
            ranges: None,
            width: None,
            height: None,
            frame_rate: None,
            threshold: None,
            error: Some(message.into()),
        }
    }
}

/// 健康检查响应
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}
