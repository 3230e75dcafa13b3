use tracing::{info, warn};

use crate::error::ClipError;
use crate::metadata::{ClipOutput, ClipResult, ProcessingReport, SegmentFailure, SegmentWindow};

/// 按规划顺序依次提取每个时间窗口并汇总结果
///
/// 单个片段失败只记录到诊断信息，然后继续处理下一个窗口。
/// 全部失败时报告的 `success()` 为 false，但仍携带完整的诊断信息和源视频时长。
pub fn aggregate<F>(windows: &[SegmentWindow], original_duration: f64, mut extract: F) -> ProcessingReport
where
    F: FnMut(&SegmentWindow) -> Result<Vec<u8>, ClipError>,
{
    let results: Vec<ClipResult> = windows
        .iter()
        .map(|window| match extract(window) {
            Ok(bytes) => ClipResult::Ok(ClipOutput {
                window: *window,
                bytes,
            }),
            Err(e) => {
                warn!("⚠️  [短视频] 片段 #{} 生成失败，继续处理下一个: {}", window.index, e);
                ClipResult::Failed(SegmentFailure {
                    index: window.index,
                    reason: e.to_string(),
                })
            }
        })
        .collect();

    let report = collect_results(results, original_duration);
    info!(
        "📦 [短视频] 片段汇总: 成功 {} 个，失败 {} 个",
        report.clips.len(),
        report.failures.len()
    );
    report
}

/// 把逐个窗口的结果整理成报告，成功片段按窗口序号排序
///
/// 顺序执行时结果本来就是有序的；并行提取时完成顺序可能乱序，这里统一按序号还原。
pub fn collect_results(results: Vec<ClipResult>, original_duration: f64) -> ProcessingReport {
    let mut clips = Vec::new();
    let mut failures = Vec::new();

    for result in results {
        match result {
            ClipResult::Ok(clip) => clips.push(clip),
            ClipResult::Failed(failure) => failures.push(failure),
        }
    }

    clips.sort_by_key(|clip| clip.window.index);
    failures.sort_by_key(|failure| failure.index);

    ProcessingReport {
        clips,
        failures,
        original_duration,
    }
}
