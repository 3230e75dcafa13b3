use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as base64_engine;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::clip_extractor::FfmpegExtractor;
use crate::config::ServerConfig;
use crate::error::ShortsError;
use crate::metadata::ProcessingReport;
use crate::payload::{
    HealthResponse, HighlightsRequestBody, HighlightsResponse, ShortsRequestBody, ShortsResponse,
    VideoInput,
};
use crate::processor::{
    detect_highlights, process_shorts, validate_highlight_params, validate_shorts_request,
    ProcessConfig, ShortsRequest,
};
use crate::video_processor::FfmpegProbe;

/// 所有请求共享的只读状态
pub struct AppState {
    pub process: ProcessConfig,
    pub server: ServerConfig,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(process: ProcessConfig, server: ServerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| anyhow::anyhow!("创建 HTTP 客户端失败: {}", e))?;
        Ok(Self {
            process,
            server,
            http,
        })
    }
}

/// 构建路由
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.server.max_upload_bytes();

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/process_video", post(handle_process_video))
        .route("/detect_highlights", post(handle_detect_highlights))
        // base64 编码的视频远超 axum 默认的 2MB 限制
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查 Handler
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        service: "Video Shorts API",
    })
}

/// 生成短视频的 Handler
pub async fn handle_process_video(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ShortsRequestBody>, JsonRejection>,
) -> (StatusCode, Json<ShortsResponse>) {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            warn!("请求体解析失败: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(ShortsResponse::failure(format!(
                    "请求体不是有效的 JSON: {}",
                    rejection.body_text()
                ))),
            );
        }
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        "收到短视频请求 {}: num_shorts={:?}, clip_length={:?}",
        request_id, body.num_shorts, body.clip_length
    );

    let request = ShortsRequest {
        requested_count: body.num_shorts,
        clip_length: body.clip_length,
        duration_hint: body.duration_hint,
    };
    // 只看参数就能拒绝的请求，不必解码或下载视频
    if let Err(e) = validate_shorts_request(&request, &state.process) {
        return shorts_error(&request_id, e);
    }

    // 临时目录在函数返回时删除，无论成功还是失败
    let work_dir = match create_work_dir(&state.server, &request_id) {
        Ok(dir) => dir,
        Err(e) => {
            error!("创建临时目录失败: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ShortsResponse::failure(e.to_string())),
            );
        }
    };

    let source = match stage_input(&state.http, &body.input, work_dir.path()).await {
        Ok(path) => path,
        Err(e) => return shorts_error(&request_id, e),
    };

    let config = state.process.clone();
    let clip_dir = work_dir.path().to_path_buf();

    let result = tokio::task::spawn_blocking(move || {
        let extractor = FfmpegExtractor::new(&clip_dir);
        process_shorts(&FfmpegProbe, &extractor, &source, &request, &config)
    })
    .await;

    match result {
        Ok(Ok(report)) => {
            info!(
                "短视频请求 {} 完成: 成功 {} 个，失败 {} 个",
                request_id,
                report.clips_created(),
                report.failures.len()
            );
            shorts_response(&report)
        }
        Ok(Err(e)) => shorts_error(&request_id, e),
        Err(e) => {
            error!("短视频请求 {} 的处理任务异常退出: {}", request_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ShortsResponse::failure(format!("处理任务异常退出: {}", e))),
            )
        }
    }
}

/// 检测运动高光的 Handler
pub async fn handle_detect_highlights(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<HighlightsRequestBody>, JsonRejection>,
) -> (StatusCode, Json<HighlightsResponse>) {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(HighlightsResponse::failure(format!(
                    "请求体不是有效的 JSON: {}",
                    rejection.body_text()
                ))),
            );
        }
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        "收到高光检测请求 {}: threshold={:?}, merge_gap={:?}",
        request_id, body.threshold, body.merge_gap
    );

    let threshold = body.threshold.unwrap_or(state.process.motion_threshold);
    if let Err(e) = validate_highlight_params(threshold, body.merge_gap) {
        return highlights_error(&request_id, e);
    }

    let work_dir = match create_work_dir(&state.server, &request_id) {
        Ok(dir) => dir,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HighlightsResponse::failure(e.to_string())),
            );
        }
    };

    let source = match stage_input(&state.http, &body.input, work_dir.path()).await {
        Ok(path) => path,
        Err(e) => return highlights_error(&request_id, e),
    };

    let config = state.process.clone();
    let merge_gap = body.merge_gap;
    let result = tokio::task::spawn_blocking(move || {
        detect_highlights(&source, Some(threshold), merge_gap, &config)
    })
    .await;

    match result {
        Ok(Ok(output)) => (StatusCode::OK, Json(HighlightsResponse::from_output(output))),
        Ok(Err(e)) => highlights_error(&request_id, e),
        Err(e) => {
            error!("高光检测请求 {} 的处理任务异常退出: {}", request_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HighlightsResponse::failure(format!("处理任务异常退出: {}", e))),
            )
        }
    }
}

/// 一个片段都没有生成时返回 500，诊断信息照常带上
fn shorts_response(report: &ProcessingReport) -> (StatusCode, Json<ShortsResponse>) {
    let status = if report.success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ShortsResponse::from_report(report)))
}

/// 错误到 HTTP 状态码的映射
pub fn status_for(e: &ShortsError) -> StatusCode {
    match e {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        ShortsError::Download(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn shorts_error(request_id: &str, e: ShortsError) -> (StatusCode, Json<ShortsResponse>) {
    error!("短视频请求 {} 失败: {}", request_id, e);
    (status_for(&e), Json(ShortsResponse::failure(e.to_string())))
}

fn highlights_error(request_id: &str, e: ShortsError) -> (StatusCode, Json<HighlightsResponse>) {
    error!("高光检测请求 {} 失败: {}", request_id, e);
    (status_for(&e), Json(HighlightsResponse::failure(e.to_string())))
}

fn create_work_dir(server: &ServerConfig, request_id: &str) -> Result<tempfile::TempDir, ShortsError> {
    std::fs::create_dir_all(&server.work_dir)?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("video-shorts-{}-", request_id))
        .tempdir_in(&server.work_dir)?;
    Ok(dir)
}

/// 把请求中的视频写入临时目录
async fn stage_input(
    client: &reqwest::Client,
    input: &VideoInput,
    dir: &Path,
) -> Result<PathBuf, ShortsError> {
    let bytes = match (&input.video_base64, &input.video_url) {
        (Some(encoded), _) if !encoded.trim().is_empty() => decode_video_base64(encoded)?,
        (_, Some(url)) if !url.trim().is_empty() => download_video(client, url.trim()).await?,
        _ => return Err(ShortsError::MissingInput),
    };

    if bytes.is_empty() {
        return Err(ShortsError::InvalidRequest("视频内容为空".to_string()));
    }

    let path = dir.join("source.mp4");
    tokio::fs::write(&path, &bytes).await?;
    info!("已写入源视频: {} ({} 字节)", path.display(), bytes.len());
    Ok(path)
}

/// 解码 base64 视频，兼容 `data:video/mp4;base64,` 前缀
fn decode_video_base64(encoded: &str) -> Result<Vec<u8>, ShortsError> {
    let encoded = encoded.trim();
    let encoded = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };

    base64_engine
        .decode(encoded)
        .map_err(|e| ShortsError::InvalidRequest(format!("video_base64 解码失败: {}", e)))
}

async fn download_video(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ShortsError> {
    info!("开始下载视频: {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ShortsError::Download(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ShortsError::Download(format!("{} 返回状态 {}", url, status)));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ShortsError::Download(format!("{}: {}", url, e)))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use crate::metadata::{ClipOutput, SegmentFailure, SegmentWindow};
    use tower::ServiceExt;

    fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let server = ServerConfig {
            work_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let state = AppState::new(ProcessConfig::default(), server).unwrap();
        (router(Arc::new(state)), dir)
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_decode_video_base64() {
        assert_eq!(decode_video_base64("bXA0").unwrap(), b"mp4".to_vec());
        assert_eq!(
            decode_video_base64("data:video/mp4;base64,bXA0\n").unwrap(),
            b"mp4".to_vec()
        );
        assert!(matches!(
            decode_video_base64("not base64!"),
            Err(ShortsError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&ShortsError::MissingInput), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&ShortsError::SourceTooShort {
                duration: 10.0,
                minimum: 30.0
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ShortsError::Probe("bad".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ShortsError::Download("404".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "OK");
    }

    #[tokio::test]
    async fn test_missing_video_is_bad_request() {
        let (app, dir) = test_app();
        let (status, json) = post_json(app, "/process_video", r#"{"num_shorts":3}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());
        // 请求结束后不留下临时目录
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (app, _dir) = test_app();
        let (status, json) = post_json(app, "/process_video", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn test_invalid_base64_is_bad_request() {
        let (app, dir) = test_app();
        let (status, json) =
            post_json(app, "/detect_highlights", r#"{"video_base64":"%%%%"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_duration_hint_rejected_and_cleaned_up() {
        let (app, dir) = test_app();
        let (status, json) = post_json(
            app,
            "/process_video",
            r#"{"video_base64":"bXA0","duration_hint":12.0}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_short_hint_rejected_before_download() {
        let (app, dir) = test_app();
        // 端口 9 上没有服务，如果先下载就会得到 502
        let (status, json) = post_json(
            app,
            "/process_video",
            r#"{"video_url":"http://127.0.0.1:9/clip.mp4","duration_hint":12.0}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("视频太短"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_threshold_rejected_before_download() {
        let (app, _dir) = test_app();
        let (status, json) = post_json(
            app,
            "/detect_highlights",
            r#"{"video_url":"http://127.0.0.1:9/clip.mp4","threshold":-5}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn test_negative_count_is_accepted() {
        let (app, _dir) = test_app();
        let (status, json) = post_json(
            app,
            "/process_video",
            r#"{"video_base64":"bXA0","num_shorts":-1}"#,
        )
        .await;

        // 请求体合法，数量按 1 处理；失败发生在解析视频阶段
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!json["error"].as_str().unwrap().contains("JSON"));
    }

    #[test]
    fn test_batch_without_clips_is_server_error() {
        let report = ProcessingReport {
            clips: Vec::new(),
            failures: vec![
                SegmentFailure {
                    index: 0,
                    reason: "ffmpeg 退出码 1".into(),
                },
                SegmentFailure {
                    index: 1,
                    reason: "输出文件为空".into(),
                },
            ],
            original_duration: 48.0,
        };

        let (status, Json(body)) = shorts_response(&report);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["clips_created"], 0);
        assert_eq!(json["original_duration"], 48.0);
        assert_eq!(json["diagnostics"].as_array().unwrap().len(), 2);
        assert!(json["diagnostics"][1].as_str().unwrap().contains("#1"));
    }

    #[test]
    fn test_partial_batch_is_ok() {
        let report = ProcessingReport {
            clips: vec![ClipOutput {
                window: SegmentWindow {
                    index: 1,
                    start: 26.0,
                    end: 41.0,
                },
                bytes: vec![1, 2, 3],
            }],
            failures: vec![SegmentFailure {
                index: 0,
                reason: "x".into(),
            }],
            original_duration: 80.0,
        };
        let (status, Json(body)) = shorts_response(&report);
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_video_is_server_error() {
        let (app, dir) = test_app();
        let (status, json) =
            post_json(app, "/process_video", r#"{"video_base64":"bXA0"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
