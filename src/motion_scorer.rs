use image::{DynamicImage, GrayImage};

use crate::error::ShortsError;
use crate::metadata::{HighlightPoint, HighlightRange};

/// 默认高斯模糊核尺寸
pub const DEFAULT_BLUR_KERNEL: usize = 21;
/// 默认高光阈值（8 位亮度平均差）
pub const DEFAULT_MOTION_THRESHOLD: f64 = 50.0;

/// 运动评分器，对相邻帧的亮度做差，找出画面剧烈变化的时间点
///
/// 阈值是 8 位亮度上的平均绝对差（每像素 0-255），不按分辨率或帧率归一化，
/// 所以同一阈值在不同分辨率的视频上表现不同。
#[derive(Debug, Clone)]
pub struct MotionScorer {
    /// 高光阈值
    threshold: f64,
    /// 归一化后的一维高斯核
    kernel: Vec<f32>,
}

impl Default for MotionScorer {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_THRESHOLD)
    }
}

impl MotionScorer {
    pub fn new(threshold: f64) -> Self {
        Self::with_kernel_size(threshold, DEFAULT_BLUR_KERNEL)
    }

    /// 指定模糊核尺寸（偶数会加一变成奇数）
    pub fn with_kernel_size(threshold: f64, kernel_size: usize) -> Self {
        let kernel_size = kernel_size.max(1) | 1;
        Self {
            threshold,
            kernel: gaussian_kernel(kernel_size),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 对帧序列评分，返回惰性的高光点序列
    ///
    /// 序列只消费一次帧源，帧源耗尽即结束。连续多帧超过阈值会连续产出多个点，不做合并。
    pub fn score<I>(&self, frames: I, frame_rate: f64) -> MotionScores<'_, I>
    where
        I: Iterator<Item = Result<DynamicImage, ShortsError>>,
    {
        MotionScores {
            scorer: self,
            frames,
            frame_rate,
            previous: None,
            frame_index: 0,
            finished: false,
        }
    }

    /// 转灰度并做高斯模糊，抑制噪点
    pub fn preprocess(&self, frame: &DynamicImage) -> GrayImage {
        let gray = frame.to_luma8();
        self.blur(&gray)
    }

    /// 两帧之间逐像素绝对差的平均值
    pub fn frame_difference(&self, previous: &GrayImage, current: &GrayImage) -> f64 {
        let total_pixels = current.width() as u64 * current.height() as u64;
        if total_pixels == 0 {
            return 0.0;
        }

        let diff_sum: u64 = previous
            .as_raw()
            .iter()
            .zip(current.as_raw().iter())
            .map(|(&p1, &p2)| p1.abs_diff(p2) as u64)
            .sum();

        diff_sum as f64 / total_pixels as f64
    }

    /// 可分离的高斯模糊，边界按 reflect-101 处理
    fn blur(&self, img: &GrayImage) -> GrayImage {
        let width = img.width() as usize;
        let height = img.height() as usize;
        if width == 0 || height == 0 || self.kernel.len() == 1 {
            return img.clone();
        }

        let radius = (self.kernel.len() / 2) as isize;
        let src = img.as_raw();

        // 水平方向
        let mut horizontal = vec![0f32; width * height];
        for y in 0..height {
            let row = &src[y * width..(y + 1) * width];
            for x in 0..width {
                let mut acc = 0f32;
                for (k, weight) in self.kernel.iter().enumerate() {
                    let sx = reflect_101(x as isize + k as isize - radius, width);
                    acc += weight * row[sx] as f32;
                }
                horizontal[y * width + x] = acc;
            }
        }

        // 垂直方向
        let mut out = GrayImage::new(img.width(), img.height());
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let (x, y) = (x as usize, y as isize);
            let mut acc = 0f32;
            for (k, weight) in self.kernel.iter().enumerate() {
                let sy = reflect_101(y + k as isize - radius, height);
                acc += weight * horizontal[sy * width + x];
            }
            pixel[0] = acc.round().clamp(0.0, 255.0) as u8;
        }

        out
    }
}

/// `MotionScorer::score` 返回的惰性序列
pub struct MotionScores<'a, I> {
    scorer: &'a MotionScorer,
    frames: I,
    frame_rate: f64,
    previous: Option<GrayImage>,
    frame_index: u64,
    finished: bool,
}

impl<I> MotionScores<'_, I> {
    /// 已经读取并预处理的帧数
    pub fn frames_scored(&self) -> u64 {
        self.frame_index
    }
}

impl<'a, I> Iterator for MotionScores<'a, I>
where
    I: Iterator<Item = Result<DynamicImage, ShortsError>>,
{
    type Item = Result<HighlightPoint, ShortsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let frame = match self.frames.next() {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            let current = self.scorer.preprocess(&frame);
            let index = self.frame_index;
            self.frame_index += 1;

            // 尺寸变化的帧无法逐像素比较，只作为新的参考帧
            let point = match self.previous.as_ref() {
                Some(previous) if previous.dimensions() == current.dimensions() => {
                    let score = self.scorer.frame_difference(previous, &current);
                    (score > self.scorer.threshold).then(|| HighlightPoint {
                        timestamp: index as f64 / self.frame_rate,
                        score,
                    })
                }
                _ => None,
            };

            self.previous = Some(current);

            if let Some(point) = point {
                return Some(Ok(point));
            }
        }
    }
}

/// 把时间间隔不超过 `max_gap` 秒的相邻高光点合并成范围
///
/// 输入需按时间戳升序排列（评分器的输出天然满足）。
pub fn merge_highlights(points: &[HighlightPoint], max_gap: f64) -> Vec<HighlightRange> {
    let mut ranges: Vec<HighlightRange> = Vec::new();

    for point in points {
        match ranges.last_mut() {
            Some(range) if point.timestamp - range.end <= max_gap => {
                range.end = point.timestamp;
                range.peak_score = range.peak_score.max(point.score);
                range.point_count += 1;
            }
            _ => ranges.push(HighlightRange {
                start: point.timestamp,
                end: point.timestamp,
                peak_score: point.score,
                point_count: 1,
            }),
        }
    }

    ranges
}

/// 一维高斯核，sigma 由核尺寸推导：`0.3 * ((k - 1) * 0.5 - 1) + 0.8`
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = (0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8).max(f64::EPSILON);
    let center = (size as f64 - 1.0) / 2.0;

    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();

    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// reflect-101 边界：`gfedcb|abcdefgh|gfedcba`
fn reflect_101(pos: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    let mut p = pos;
    loop {
        if p < 0 {
            p = -p;
        } else if p >= len {
            p = 2 * (len - 1) - p;
        } else {
            return p as usize;
        }
    }
}
