use crate::metadata::SegmentWindow;
use crate::processor::ProcessConfig;

/// 片段规划器，把视频时长和请求的短视频数量转换成具体的时间窗口
#[derive(Debug, Clone, Copy)]
pub struct SegmentPlanner {
    /// 单次请求最多生成的短视频数量
    max_count: u32,
    /// 单个片段的最小长度（秒）
    min_segment_length: f64,
    /// 每段起始偏移的上限（秒）
    max_offset: f64,
    /// 每段起始偏移占分段时长的比例
    offset_ratio: f64,
}

impl Default for SegmentPlanner {
    fn default() -> Self {
        Self {
            max_count: 5,
            min_segment_length: 5.0,
            max_offset: 10.0,
            offset_ratio: 0.2,
        }
    }
}

impl From<&ProcessConfig> for SegmentPlanner {
    fn from(config: &ProcessConfig) -> Self {
        Self {
            max_count: config.max_shorts,
            min_segment_length: config.min_segment_length,
            max_offset: config.max_offset,
            offset_ratio: config.offset_ratio,
        }
    }
}

impl SegmentPlanner {
    pub fn new(max_count: u32, min_segment_length: f64) -> Self {
        Self {
            max_count,
            min_segment_length,
            ..Self::default()
        }
    }

    /// 实际生效的片段数量，限制在 `[1, max_count]`，零和负数按 1 处理
    pub fn effective_count(&self, requested_count: i64) -> u32 {
        let max_count = self.max_count.max(1);
        requested_count.clamp(1, i64::from(max_count)) as u32
    }

    /// 规划时间窗口
    ///
    /// 视频被平均分成 `effective_count` 段，每段从段首加上
    /// `min(max_offset, 段长 * offset_ratio)` 处开始，截取 `clip_length` 秒（不超过视频结尾）。
    /// 一旦某个窗口短于最小片段长度，规划立即结束，后面的序号都不再尝试。
    ///
    /// 调用方需要先拒绝过短的源视频。
    pub fn plan(&self, duration: f64, requested_count: i64, clip_length: f64) -> Vec<SegmentWindow> {
        if !duration.is_finite() || duration <= 0.0 || !clip_length.is_finite() {
            return Vec::new();
        }

        let count = self.effective_count(requested_count);
        let segment_duration = duration / count as f64;
        let offset = self.max_offset.min(segment_duration * self.offset_ratio);

        let mut windows = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let start = i as f64 * segment_duration + offset;
            let end = duration.min(start + clip_length);

            if end - start < self.min_segment_length {
                break;
            }

            windows.push(SegmentWindow { index: i, start, end });
        }

        windows
    }
}
