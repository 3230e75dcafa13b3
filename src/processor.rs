use anyhow::{Context, Result};
use image::DynamicImage;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::aggregator::aggregate;
use crate::aspect::{compute_transform, DEFAULT_TARGET_HEIGHT, DEFAULT_TARGET_WIDTH};
use crate::clip_extractor::{EncodeParams, Extractor};
use crate::error::ShortsError;
use crate::metadata::{
    HighlightPoint, HighlightRange, ProcessingReport, ShortManifestEntry, ShortsManifest, VideoMeta,
};
use crate::motion_scorer::{merge_highlights, MotionScorer, DEFAULT_BLUR_KERNEL, DEFAULT_MOTION_THRESHOLD};
use crate::segment_planner::SegmentPlanner;
use crate::video_processor::{MediaProbe, VideoProcessor};

/// 视频处理配置
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// 请求未指定数量时生成的短视频数量
    pub default_shorts: u32,
    /// 单次请求最多生成的短视频数量
    pub max_shorts: u32,
    /// 每个短视频的目标长度（秒）
    pub clip_length: f64,
    /// 源视频的最短时长（秒），更短的视频直接拒绝
    pub min_source_duration: f64,
    /// 单个片段的最小长度（秒），与源视频最短时长相互独立
    pub min_segment_length: f64,
    /// 每段起始偏移上限（秒）
    pub max_offset: f64,
    /// 每段起始偏移占分段时长的比例
    pub offset_ratio: f64,
    /// 输出宽度
    pub target_width: u32,
    /// 输出高度
    pub target_height: u32,
    /// 高光检测阈值（8 位亮度平均差）
    pub motion_threshold: f64,
    /// 高光检测的高斯模糊核尺寸
    pub blur_kernel: usize,
    /// 编码参数
    pub encode: EncodeParams,
}

impl ProcessConfig {
    /// 从环境变量和配置文件加载配置
    pub fn from_env_and_file(config_file: Option<&Path>) -> Result<Self> {
        use crate::config::{ConfigLoader, ConfigOverrides};
        ConfigLoader::load_config(config_file, &ConfigOverrides::default())
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_shorts: 3,
            max_shorts: 5,
            clip_length: 15.0,
            min_source_duration: 30.0,
            min_segment_length: 5.0,
            max_offset: 10.0,
            offset_ratio: 0.2,
            target_width: DEFAULT_TARGET_WIDTH,
            target_height: DEFAULT_TARGET_HEIGHT,
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            blur_kernel: DEFAULT_BLUR_KERNEL,
            encode: EncodeParams::default(),
        }
    }
}

/// 一次切片请求
#[derive(Debug, Clone, Default)]
pub struct ShortsRequest {
    /// 请求的短视频数量（为空时使用配置的默认值）
    pub requested_count: Option<i64>,
    /// 短视频长度（秒，为空时使用配置值）
    pub clip_length: Option<f64>,
    /// 调用方提供的时长提示，用于在探测之前提前拒绝过短的视频
    pub duration_hint: Option<f64>,
}

/// 高光检测结果
#[derive(Debug, Clone)]
pub struct HighlightOutput {
    pub points: Vec<HighlightPoint>,
    /// 合并后的高光范围（仅在请求了合并时存在）
    pub ranges: Option<Vec<HighlightRange>>,
    /// 源视频信息，分数与分辨率相关，需一并返回
    pub meta: VideoMeta,
    pub threshold: f64,
}

/// 生成短视频
///
/// 流程：参数校验 → 媒体探测 → 时长校验 → 片段规划 → 逐个片段变换与提取 → 汇总。
/// 校验和探测错误直接返回；单个片段的失败只进入报告的诊断信息。
pub fn process_shorts<P, E>(
    probe: &P,
    extractor: &E,
    input_video_path: &Path,
    request: &ShortsRequest,
    config: &ProcessConfig,
) -> Result<ProcessingReport, ShortsError>
where
    P: MediaProbe + ?Sized,
    E: Extractor + ?Sized,
{
    let total_start = Instant::now();
    info!("🎬 [短视频] 开始处理视频: {}", input_video_path.display());

    // 1. 请求校验
    validate_shorts_request(request, config)?;
    let requested_count = request.requested_count.unwrap_or(i64::from(config.default_shorts));
    let clip_length = request.clip_length.unwrap_or(config.clip_length);
    if !input_video_path.exists() {
        return Err(ShortsError::MissingInput);
    }

    // 2. 媒体探测
    let probe_start = Instant::now();
    let meta = probe.probe(input_video_path).map_err(|e| {
        error!("❌ [短视频] 获取视频信息失败: {}", e);
        e
    })?;
    info!(
        "✅ [短视频] 获取视频信息完成，耗时: {:.2}秒",
        probe_start.elapsed().as_secs_f64()
    );
    info!("  • 时长: {:.2}秒", meta.duration);
    info!("  • 分辨率: {}", meta.resolution());
    info!("  • 帧率: {:.2} fps", meta.frame_rate);

    if meta.duration < config.min_source_duration {
        warn!(
            "⚠️  [短视频] 视频太短: {:.2}秒 < {:.0}秒",
            meta.duration, config.min_source_duration
        );
        return Err(ShortsError::SourceTooShort {
            duration: meta.duration,
            minimum: config.min_source_duration,
        });
    }

    // 3. 片段规划
    let planner = SegmentPlanner::from(config);
    let windows = planner.plan(meta.duration, requested_count, clip_length);
    info!(
        "📐 [短视频] 规划片段: 请求 {} 个，生效 {} 个，实际 {} 个",
        requested_count,
        planner.effective_count(requested_count),
        windows.len()
    );

    // 4. 逐个片段提取
    let report = aggregate(&windows, meta.duration, |window| {
        let transform = compute_transform(meta.width, meta.height, config.target_height, config.target_width);
        info!(
            "⏳ [短视频] 片段 #{} ({}): {:.2}s-{:.2}s, {:?}",
            window.index,
            window.label(),
            window.start,
            window.end,
            transform.mode
        );
        extractor.extract(input_video_path, window, &transform, &config.encode)
    });

    if report.success() {
        info!(
            "🎉 [短视频] 处理完成！生成 {} 个短视频，总耗时: {:.2}秒",
            report.clips_created(),
            total_start.elapsed().as_secs_f64()
        );
    } else {
        error!(
            "❌ [短视频] 没有生成任何短视频（尝试 {} 个片段），总耗时: {:.2}秒",
            windows.len(),
            total_start.elapsed().as_secs_f64()
        );
    }

    Ok(report)
}

/// 只依赖请求参数的校验，在准备输入视频之前就可以执行
pub fn validate_shorts_request(request: &ShortsRequest, config: &ProcessConfig) -> Result<(), ShortsError> {
    let clip_length = request.clip_length.unwrap_or(config.clip_length);
    if !clip_length.is_finite() || clip_length <= 0.0 {
        return Err(ShortsError::InvalidRequest(format!(
            "clip_length 必须是正数，当前为 {}",
            clip_length
        )));
    }
    if let Some(hint) = request.duration_hint {
        if hint < config.min_source_duration {
            return Err(ShortsError::SourceTooShort {
                duration: hint,
                minimum: config.min_source_duration,
            });
        }
    }
    Ok(())
}

/// 检测视频中的运动高光
pub fn detect_highlights(
    input_video_path: &Path,
    threshold: Option<f64>,
    merge_gap: Option<f64>,
    config: &ProcessConfig,
) -> Result<HighlightOutput, ShortsError> {
    let threshold = threshold.unwrap_or(config.motion_threshold);
    validate_highlight_params(threshold, merge_gap)?;
    if !input_video_path.exists() {
        return Err(ShortsError::MissingInput);
    }

    let total_start = Instant::now();
    info!("🔍 [高光检测] 开始分析视频: {}", input_video_path.display());

    let processor = VideoProcessor::new(input_video_path)?;
    let meta = processor.get_video_info()?;
    info!(
        "  • 分辨率: {}, 帧率: {:.2} fps, 阈值: {:.1}",
        meta.resolution(),
        meta.frame_rate,
        threshold
    );

    let scorer = MotionScorer::with_kernel_size(threshold, config.blur_kernel);
    let output = score_frames(processor.frames()?, meta, &scorer, merge_gap)?;

    info!(
        "✅ [高光检测] 完成，检测到 {} 个高光点，耗时: {:.2}秒",
        output.points.len(),
        total_start.elapsed().as_secs_f64()
    );

    Ok(output)
}

/// 对已经解码的帧序列评分并按需合并
pub fn score_frames<I>(
    frames: I,
    meta: VideoMeta,
    scorer: &MotionScorer,
    merge_gap: Option<f64>,
) -> Result<HighlightOutput, ShortsError>
where
    I: Iterator<Item = Result<DynamicImage, ShortsError>>,
{
    let mut scores = scorer.score(frames, meta.frame_rate);
    let mut points = Vec::new();
    while let Some(result) = scores.next() {
        match result {
            Ok(point) => points.push(point),
            // 一帧都没解出来才算失败，否则保留已经得到的高光点
            Err(e) if scores.frames_scored() == 0 => return Err(e),
            Err(e) => {
                warn!(
                    "⚠️  [高光检测] 第 {} 帧之后解码中断，保留已检测到的 {} 个高光点: {}",
                    scores.frames_scored(),
                    points.len(),
                    e
                );
                break;
            }
        }
    }
    let ranges = merge_gap.map(|gap| merge_highlights(&points, gap));

    Ok(HighlightOutput {
        points,
        ranges,
        meta,
        threshold: scorer.threshold(),
    })
}

pub fn validate_highlight_params(threshold: f64, merge_gap: Option<f64>) -> Result<(), ShortsError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(ShortsError::InvalidRequest(format!(
            "threshold 必须是非负数，当前为 {}",
            threshold
        )));
    }
    if let Some(gap) = merge_gap {
        if !gap.is_finite() || gap < 0.0 {
            return Err(ShortsError::InvalidRequest(format!(
                "merge_gap 必须是非负数，当前为 {}",
                gap
            )));
        }
    }
    Ok(())
}

/// 把短视频和 report.json 写入输出目录（CLI 模式）
pub fn write_shorts(
    report: &ProcessingReport,
    input_video_path: &Path,
    output_dir: &Path,
) -> Result<ShortsManifest> {
    std::fs::create_dir_all(output_dir).context("创建输出目录失败")?;

    let mut entries = Vec::with_capacity(report.clips.len());
    for clip in &report.clips {
        let file = format!("short_{:02}.mp4", clip.window.index);
        let path = output_dir.join(&file);
        std::fs::write(&path, &clip.bytes)
            .with_context(|| format!("保存短视频失败: {}", path.display()))?;
        info!("💾 [短视频] 已保存: {}", path.display());

        entries.push(ShortManifestEntry {
            index: clip.window.index,
            file,
            label: clip.label(),
            timestamp: clip.window.start,
            duration: clip.window.duration(),
        });
    }

    let manifest = ShortsManifest {
        input_video: input_video_path.to_string_lossy().to_string(),
        success: report.success(),
        original_duration: report.original_duration,
        clips_created: report.clips_created(),
        clips: entries,
        diagnostics: report.diagnostics(),
    };

    let manifest_path = output_dir.join("report.json");
    let manifest_json = serde_json::to_string_pretty(&manifest).context("序列化报告失败")?;
    std::fs::write(&manifest_path, manifest_json)
        .with_context(|| format!("写入报告失败: {}", manifest_path.display()))?;

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClipError;
    use crate::metadata::{SegmentWindow, TransformMode, TransformSpec};
    use image::{ImageBuffer, Luma};
    use std::cell::RefCell;

    struct FakeProbe(Result<VideoMeta, String>);

    impl MediaProbe for FakeProbe {
        fn probe(&self, _path: &Path) -> Result<VideoMeta, ShortsError> {
            self.0.clone().map_err(ShortsError::Probe)
        }
    }

    /// 按片段序号决定成功或失败，并记录每次调用
    struct FakeExtractor {
        failing: Vec<usize>,
        calls: RefCell<Vec<(usize, TransformSpec)>>,
    }

    impl FakeExtractor {
        fn failing(failing: &[usize]) -> Self {
            Self {
                failing: failing.to_vec(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Extractor for FakeExtractor {
        fn extract(
            &self,
            _source: &Path,
            window: &SegmentWindow,
            transform: &TransformSpec,
            _params: &EncodeParams,
        ) -> Result<Vec<u8>, ClipError> {
            self.calls.borrow_mut().push((window.index, *transform));
            if self.failing.contains(&window.index) {
                Err(ClipError::encode(Some(1), "Invalid data found when processing input"))
            } else {
                Ok(format!("clip-{}", window.index).into_bytes())
            }
        }
    }

    fn meta(duration: f64) -> VideoMeta {
        VideoMeta {
            duration,
            frame_rate: 25.0,
            width: 1280,
            height: 720,
        }
    }

    fn source_file() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    #[test]
    fn test_process_shorts_success() {
        let source = source_file();
        let extractor = FakeExtractor::failing(&[]);
        let request = ShortsRequest::default();

        let report = process_shorts(
            &FakeProbe(Ok(meta(40.0))),
            &extractor,
            source.path(),
            &request,
            &ProcessConfig::default(),
        )
        .unwrap();

        assert!(report.success());
        assert_eq!(report.clips_created(), 3);
        assert_eq!(report.original_duration, 40.0);
        assert!(report.diagnostics().is_empty());
        assert_eq!(report.clips[1].bytes, b"clip-1".to_vec());

        let calls = extractor.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, t)| t.mode == TransformMode::Crop));
    }

    #[test]
    fn test_short_source_is_rejected_before_planning() {
        let source = source_file();
        let extractor = FakeExtractor::failing(&[]);

        let result = process_shorts(
            &FakeProbe(Ok(meta(29.9))),
            &extractor,
            source.path(),
            &ShortsRequest::default(),
            &ProcessConfig::default(),
        );

        assert!(matches!(result, Err(ShortsError::SourceTooShort { .. })));
        assert!(extractor.calls.borrow().is_empty());
    }

    #[test]
    fn test_duration_hint_rejects_without_probe() {
        let extractor = FakeExtractor::failing(&[]);
        let request = ShortsRequest {
            duration_hint: Some(12.0),
            ..ShortsRequest::default()
        };

        // 探测本身会失败，但时长提示先生效
        let result = process_shorts(
            &FakeProbe(Err("should not be called".into())),
            &extractor,
            Path::new("/nonexistent.mp4"),
            &request,
            &ProcessConfig::default(),
        );
        assert!(matches!(result, Err(ShortsError::SourceTooShort { duration, .. }) if duration == 12.0));
    }

    #[test]
    fn test_probe_error_is_fatal() {
        let source = source_file();
        let result = process_shorts(
            &FakeProbe(Err("moov atom not found".into())),
            &FakeExtractor::failing(&[]),
            source.path(),
            &ShortsRequest::default(),
            &ProcessConfig::default(),
        );
        assert!(matches!(result, Err(ShortsError::Probe(ref m)) if m.contains("moov")));
    }

    #[test]
    fn test_missing_input_file() {
        let result = process_shorts(
            &FakeProbe(Ok(meta(60.0))),
            &FakeExtractor::failing(&[]),
            Path::new("/nonexistent/input.mp4"),
            &ShortsRequest::default(),
            &ProcessConfig::default(),
        );
        assert!(matches!(result, Err(ShortsError::MissingInput)));
    }

    #[test]
    fn test_invalid_clip_length() {
        let source = source_file();
        let request = ShortsRequest {
            clip_length: Some(-1.0),
            ..ShortsRequest::default()
        };
        let result = process_shorts(
            &FakeProbe(Ok(meta(60.0))),
            &FakeExtractor::failing(&[]),
            source.path(),
            &request,
            &ProcessConfig::default(),
        );
        assert!(matches!(result, Err(ShortsError::InvalidRequest(_))));
    }

    #[test]
    fn test_partial_and_total_failure() {
        let source = source_file();
        let request = ShortsRequest {
            requested_count: Some(5),
            ..ShortsRequest::default()
        };

        let partial = process_shorts(
            &FakeProbe(Ok(meta(300.0))),
            &FakeExtractor::failing(&[1, 3]),
            source.path(),
            &request,
            &ProcessConfig::default(),
        )
        .unwrap();
        assert!(partial.success());
        let indices: Vec<usize> = partial.clips.iter().map(|c| c.window.index).collect();
        assert_eq!(indices, vec![0, 2, 4]);
        assert_eq!(partial.diagnostics().len(), 2);

        let total = process_shorts(
            &FakeProbe(Ok(meta(300.0))),
            &FakeExtractor::failing(&[0, 1, 2, 3, 4]),
            source.path(),
            &request,
            &ProcessConfig::default(),
        )
        .unwrap();
        assert!(!total.success());
        assert_eq!(total.clips_created(), 0);
        assert_eq!(total.diagnostics().len(), 5);
        assert_eq!(total.original_duration, 300.0);
    }

    #[test]
    fn test_non_positive_count_produces_one_clip() {
        let source = source_file();
        for count in [0, -1, -100] {
            let extractor = FakeExtractor::failing(&[]);
            let request = ShortsRequest {
                requested_count: Some(count),
                ..ShortsRequest::default()
            };

            let report = process_shorts(
                &FakeProbe(Ok(meta(60.0))),
                &extractor,
                source.path(),
                &request,
                &ProcessConfig::default(),
            )
            .unwrap();

            assert_eq!(report.clips_created(), 1);
            // 唯一的一段覆盖整个视频，偏移取上限 10 秒
            assert_eq!(report.clips[0].window.start, 10.0);
            assert_eq!(report.clips[0].window.end, 25.0);
        }
    }

    #[test]
    fn test_narrow_source_uses_resize_only() {
        let source = source_file();
        let extractor = FakeExtractor::failing(&[]);
        let narrow = VideoMeta {
            width: 480,
            height: 1280,
            ..meta(60.0)
        };

        process_shorts(
            &FakeProbe(Ok(narrow)),
            &extractor,
            source.path(),
            &ShortsRequest::default(),
            &ProcessConfig::default(),
        )
        .unwrap();

        let calls = extractor.calls.borrow();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|(_, t)| t.mode == TransformMode::ResizeOnly));
    }

    #[test]
    fn test_score_frames_with_merge() {
        let frames: Vec<Result<DynamicImage, ShortsError>> = [0u8, 200, 0, 0, 0, 0, 200]
            .iter()
            .map(|&v| Ok(DynamicImage::ImageLuma8(ImageBuffer::from_fn(8, 8, |_, _| Luma([v])))))
            .collect();
        let scorer = MotionScorer::with_kernel_size(50.0, 3);

        let output = score_frames(frames.into_iter(), meta(60.0), &scorer, Some(0.05)).unwrap();

        let timestamps: Vec<f64> = output.points.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![1.0 / 25.0, 2.0 / 25.0, 6.0 / 25.0]);
        let ranges = output.ranges.unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].point_count, 2);
        assert_eq!(output.threshold, 50.0);
        assert_eq!(output.meta.width, 1280);
    }

    #[test]
    fn test_decode_error_keeps_earlier_highlights() {
        let frame = |v: u8| -> Result<DynamicImage, ShortsError> {
            Ok(DynamicImage::ImageLuma8(ImageBuffer::from_fn(8, 8, |_, _| Luma([v]))))
        };
        let frames: Vec<Result<DynamicImage, ShortsError>> = vec![
            frame(0),
            frame(200),
            frame(200),
            Err(ShortsError::Decode("读取数据包失败".into())),
            frame(0),
        ];
        let scorer = MotionScorer::with_kernel_size(50.0, 3);

        let output = score_frames(frames.into_iter(), meta(60.0), &scorer, None).unwrap();

        assert_eq!(output.points.len(), 1);
        assert_eq!(output.points[0].timestamp, 1.0 / 25.0);
    }

    #[test]
    fn test_decode_error_before_first_frame_is_fatal() {
        let frames: Vec<Result<DynamicImage, ShortsError>> =
            vec![Err(ShortsError::Decode("无法创建缩放器".into()))];
        let scorer = MotionScorer::new(50.0);

        let result = score_frames(frames.into_iter(), meta(60.0), &scorer, None);
        assert!(matches!(result, Err(ShortsError::Decode(_))));
    }

    #[test]
    fn test_highlight_params_validation() {
        assert!(validate_highlight_params(50.0, None).is_ok());
        assert!(validate_highlight_params(-1.0, None).is_err());
        assert!(validate_highlight_params(f64::NAN, None).is_err());
        assert!(validate_highlight_params(20.0, Some(-0.5)).is_err());
    }

    #[test]
    fn test_write_shorts_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file();
        let report = process_shorts(
            &FakeProbe(Ok(meta(300.0))),
            &FakeExtractor::failing(&[1]),
            source.path(),
            &ShortsRequest {
                requested_count: Some(3),
                ..ShortsRequest::default()
            },
            &ProcessConfig::default(),
        )
        .unwrap();

        let manifest = write_shorts(&report, source.path(), dir.path()).unwrap();

        assert!(manifest.success);
        assert_eq!(manifest.clips_created, 2);
        assert_eq!(manifest.clips[0].file, "short_00.mp4");
        assert_eq!(manifest.clips[1].file, "short_02.mp4");
        assert_eq!(manifest.diagnostics.len(), 1);
        assert_eq!(
            std::fs::read(dir.path().join("short_02.mp4")).unwrap(),
            b"clip-2".to_vec()
        );

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("report.json")).unwrap()).unwrap();
        assert_eq!(json["clips"][1]["type"], "type A");
        assert_eq!(json["clips_created"], 2);
    }
}
