use serde::{Deserialize, Serialize};
use std::fmt;

/// 源视频的基础信息，由媒体探测生成一次，之后只读
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    /// 视频总时长（秒）
    pub duration: f64,
    /// 视频帧率
    pub frame_rate: f64,
    /// 原始宽度（像素）
    pub width: u32,
    /// 原始高度（像素）
    pub height: u32,
}

impl VideoMeta {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// 短视频的展示标签，按片段序号的奇偶交替，不携带任何语义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipLabel {
    #[serde(rename = "type A")]
    TypeA,
    #[serde(rename = "type B")]
    TypeB,
}

impl ClipLabel {
    pub fn from_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::TypeA
        } else {
            Self::TypeB
        }
    }
}

impl fmt::Display for ClipLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeA => f.write_str("type A"),
            Self::TypeB => f.write_str("type B"),
        }
    }
}

/// 计划提取的时间窗口 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentWindow {
    /// 片段序号（从 0 开始）
    pub index: usize,
    /// 开始时间（秒）
    pub start: f64,
    /// 结束时间（秒）
    pub end: f64,
}

impl SegmentWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn label(&self) -> ClipLabel {
        ClipLabel::from_index(self.index)
    }
}

/// 画面变换方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    /// 等比缩放到目标高度后水平居中裁剪到目标宽度
    Crop,
    /// 只等比缩放，接受非精确的宽高比
    ResizeOnly,
}

/// 单个片段的画面变换参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub target_width: u32,
    pub target_height: u32,
    /// 缩放到目标高度后的宽度（偶数，便于编码器处理）
    pub scaled_width: u32,
    /// 裁剪区域中心的横坐标，仅 Crop 模式下存在
    pub crop_center_x: Option<u32>,
    pub mode: TransformMode,
}

/// 一个检测到的高光时间点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightPoint {
    /// 时间戳（秒）
    pub timestamp: f64,
    /// 相邻帧平均亮度差
    pub score: f64,
}

/// 相邻高光点合并后的时间范围
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightRange {
    pub start: f64,
    pub end: f64,
    pub peak_score: f64,
    pub point_count: usize,
}

/// 成功生成的短视频
#[derive(Debug, Clone, PartialEq)]
pub struct ClipOutput {
    pub window: SegmentWindow,
    pub bytes: Vec<u8>,
}

impl ClipOutput {
    pub fn label(&self) -> ClipLabel {
        self.window.label()
    }
}

/// 生成失败的片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFailure {
    pub index: usize,
    pub reason: String,
}

impl fmt::Display for SegmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "片段 #{} 生成失败: {}", self.index, self.reason)
    }
}

/// 单个时间窗口的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ClipResult {
    Ok(ClipOutput),
    Failed(SegmentFailure),
}

/// 一次切片请求的汇总报告
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingReport {
    /// 按规划顺序排列的成功片段
    pub clips: Vec<ClipOutput>,
    /// 失败片段，成功时也会保留
    pub failures: Vec<SegmentFailure>,
    /// 探测到的源视频时长（秒）
    pub original_duration: f64,
}

impl ProcessingReport {
    pub fn success(&self) -> bool {
        !self.clips.is_empty()
    }

    pub fn clips_created(&self) -> usize {
        self.clips.len()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.failures.iter().map(ToString::to_string).collect()
    }
}

/// CLI 模式下写入输出目录的单个短视频描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortManifestEntry {
    /// 片段序号
    pub index: usize,
    /// 短视频文件名
    pub file: String,
    /// 展示标签
    #[serde(rename = "type")]
    pub label: ClipLabel,
    /// 在源视频中的开始时间（秒）
    pub timestamp: f64,
    /// 片段时长（秒）
    pub duration: f64,
}

/// CLI 模式下写入输出目录的 report.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortsManifest {
    pub input_video: String,
    pub success: bool,
    pub original_duration: f64,
    pub clips_created: usize,
    pub clips: Vec<ShortManifestEntry>,
    pub diagnostics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_alternates_by_parity() {
        let labels: Vec<ClipLabel> = (0..4).map(ClipLabel::from_index).collect();
        assert_eq!(
            labels,
            vec![
                ClipLabel::TypeA,
                ClipLabel::TypeB,
                ClipLabel::TypeA,
                ClipLabel::TypeB
            ]
        );
        assert_eq!(serde_json::to_string(&ClipLabel::TypeB).unwrap(), "\"type B\"");
    }

    #[test]
    fn test_report_success_requires_a_clip() {
        let window = SegmentWindow {
            index: 0,
            start: 2.0,
            end: 17.0,
        };
        let mut report = ProcessingReport {
            clips: Vec::new(),
            failures: vec![SegmentFailure {
                index: 0,
                reason: "encoder crashed".into(),
            }],
            original_duration: 60.0,
        };
        assert!(!report.success());
        assert_eq!(report.diagnostics(), vec!["片段 #0 生成失败: encoder crashed"]);

        report.clips.push(ClipOutput {
            window,
            bytes: vec![0, 1, 2],
        });
        assert!(report.success());
        assert_eq!(report.clips_created(), 1);
        assert_eq!(report.diagnostics().len(), 1);
    }
}
