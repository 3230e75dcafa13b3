use crate::metadata::{TransformMode, TransformSpec};

/// 竖屏短视频的默认输出尺寸（9:16）
pub const DEFAULT_TARGET_WIDTH: u32 = 1080;
pub const DEFAULT_TARGET_HEIGHT: u32 = 1920;

/// 计算单个片段的画面变换参数
///
/// 先按比例缩放到目标高度；如果缩放后的宽度不小于目标宽度，就水平居中裁剪到目标宽度，
/// 否则只做缩放（接受非精确的宽高比而不是失败）。
/// 结果只取决于源视频的宽高，同一个视频的每个片段得到的参数完全相同。
pub fn compute_transform(
    source_width: u32,
    source_height: u32,
    target_height: u32,
    target_width: u32,
) -> TransformSpec {
    let exact_width = exact_scaled_width(source_width, source_height, target_height);
    let scaled_width = exact_width.map_or(0, even_width);

    // 用未取整的宽度判断，取偶数只影响滤镜参数
    if exact_width.is_some_and(|exact| exact >= target_width as f64) {
        TransformSpec {
            target_width,
            target_height,
            scaled_width,
            crop_center_x: Some(scaled_width / 2),
            mode: TransformMode::Crop,
        }
    } else {
        TransformSpec {
            target_width,
            target_height,
            scaled_width,
            crop_center_x: None,
            mode: TransformMode::ResizeOnly,
        }
    }
}

/// 按比例缩放到目标高度后的精确宽度，源尺寸未知时为 None
fn exact_scaled_width(source_width: u32, source_height: u32, target_height: u32) -> Option<f64> {
    if source_width == 0 || source_height == 0 {
        return None;
    }
    Some(source_width as f64 * target_height as f64 / source_height as f64)
}

/// 取最接近的偶数（yuv420p 要求宽度为偶数）
fn even_width(exact: f64) -> u32 {
    let even = (exact / 2.0).round() as u32 * 2;
    even.max(2)
}

impl TransformSpec {
    /// 渲染成 ffmpeg 的 `-vf` 滤镜字符串
    pub fn to_filter(&self) -> String {
        match (self.mode, self.crop_center_x) {
            (TransformMode::Crop, Some(center_x)) => {
                let crop_x = center_x.saturating_sub(self.target_width / 2);
                format!(
                    "scale={}:{},crop={}:{}:{}:0",
                    self.scaled_width,
                    self.target_height,
                    self.target_width,
                    self.target_height,
                    crop_x
                )
            }
            _ if self.scaled_width > 0 => {
                format!("scale={}:{}", self.scaled_width, self.target_height)
            }
            // 源尺寸未知时交给 ffmpeg 按比例计算宽度
            _ => format!("scale=-2:{}", self.target_height),
        }
    }
}
