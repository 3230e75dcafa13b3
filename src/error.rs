use thiserror::Error;

/// 请求级错误：校验失败或不可恢复的处理失败，会直接中止整个请求
#[derive(Debug, Error)]
pub enum ShortsError {
    #[error("缺少输入视频")]
    MissingInput,

    #[error("请求参数无效: {0}")]
    InvalidRequest(String),

    #[error("视频太短: {duration:.2}秒（最少 {minimum:.0} 秒）")]
    SourceTooShort { duration: f64, minimum: f64 },

    #[error("无法解析视频: {0}")]
    Probe(String),

    #[error("视频解码失败: {0}")]
    Decode(String),

    #[error("下载视频失败: {0}")]
    Download(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl ShortsError {
    /// 是否属于请求校验错误（在探测和规划之前就被拒绝）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingInput | Self::InvalidRequest(_) | Self::SourceTooShort { .. }
        )
    }
}

/// 单个片段的提取失败，只会被记录到诊断信息中，不会中止整批处理
#[derive(Debug, Error)]
pub enum ClipError {
    #[error("执行 ffmpeg 失败: {0}")]
    Spawn(std::io::Error),

    #[error("ffmpeg 编码失败 (退出码 {code:?}): {stderr}")]
    Encode { code: Option<i32>, stderr: String },

    #[error("ffmpeg 没有生成有效的输出文件")]
    EmptyOutput,

    #[error("临时文件读写失败: {0}")]
    Io(#[from] std::io::Error),
}

impl ClipError {
    pub fn encode(code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Encode {
            code,
            stderr: stderr.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(ShortsError::MissingInput.is_validation());
        assert!(ShortsError::SourceTooShort {
            duration: 12.0,
            minimum: 30.0
        }
        .is_validation());
        assert!(!ShortsError::Probe("moov atom not found".into()).is_validation());
        assert!(!ShortsError::Download("404".into()).is_validation());
    }

    #[test]
    fn test_too_short_message_carries_duration() {
        let err = ShortsError::SourceTooShort {
            duration: 12.5,
            minimum: 30.0,
        };
        let message = err.to_string();
        assert!(message.contains("12.50"));
        assert!(message.contains("30"));
    }
}
