pub mod error;
pub mod metadata;
pub mod video_processor;
pub mod segment_planner;
pub mod aspect;
pub mod motion_scorer;
pub mod clip_extractor;
pub mod aggregator;
pub mod processor;
pub mod payload;
pub mod handler;
pub mod config;

pub use error::{ClipError, ShortsError};
pub use video_processor::{FfmpegProbe, MediaProbe, VideoProcessor};
pub use segment_planner::SegmentPlanner;
pub use aspect::compute_transform;
pub use motion_scorer::{merge_highlights, MotionScorer};
pub use clip_extractor::{EncodeParams, Extractor, FfmpegExtractor};
pub use metadata::{
    ClipLabel, ClipOutput, HighlightPoint, HighlightRange, ProcessingReport, SegmentWindow,
    TransformMode, TransformSpec, VideoMeta,
};
pub use processor::{
    detect_highlights, process_shorts, write_shorts, HighlightOutput, ProcessConfig, ShortsRequest,
};
pub use config::{ConfigLoader, ServerConfig};
