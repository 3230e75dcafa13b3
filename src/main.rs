use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use video_shorts::config::{ConfigLoader, ConfigOverrides};
use video_shorts::handler::{self, AppState};
use video_shorts::{
    detect_highlights, process_shorts, write_shorts, FfmpegExtractor, FfmpegProbe, ProcessConfig,
    ShortsRequest,
};

/// 短视频切片工具 - 把长视频切成竖屏短视频，并检测运动高光
#[derive(Parser, Debug)]
#[command(name = "video-shorts")]
#[command(about = "短视频切片工具：生成竖屏短视频、检测运动高光", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// CLI 模式：把本地视频切成短视频
    Shorts {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 输出目录
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,

        /// 需要生成的短视频数量（超过上限时按上限处理）
        #[arg(short, long, allow_negative_numbers = true)]
        count: Option<i64>,

        /// 单次最多生成的短视频数量
        /// 可通过环境变量 VIDEO_SHORTS_MAX_COUNT 或配置文件设置
        #[arg(long)]
        max_shorts: Option<u32>,

        /// 每个短视频的长度（秒）
        /// 可通过环境变量 VIDEO_SHORTS_CLIP_LENGTH 或配置文件设置
        #[arg(long)]
        clip_length: Option<f64>,

        /// x264 编码预设
        #[arg(long)]
        preset: Option<String>,

        /// 编码线程数
        #[arg(long)]
        threads: Option<u32>,

        /// 输出帧率（不指定则沿用源视频帧率）
        #[arg(long)]
        frame_rate: Option<f64>,
    },
    /// CLI 模式：检测本地视频中的运动高光
    Highlights {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 配置文件路径（可选）
        #[arg(long)]
        config: Option<PathBuf>,

        /// 高光阈值（8 位亮度平均差）
        /// 可通过环境变量 VIDEO_SHORTS_MOTION_THRESHOLD 或配置文件设置
        #[arg(long)]
        threshold: Option<f64>,

        /// 合并相邻高光点的最大间隔（秒），不指定则不合并
        #[arg(long)]
        merge_gap: Option<f64>,
    },
    /// Web 服务模式：启动 HTTP 服务器
    Serve {
        /// 监听地址（默认从环境变量 PORT 读取，如果不存在则使用 0.0.0.0:5000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 配置文件路径（可选）
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 生成一份带默认值的配置文件
    InitConfig {
        /// 配置文件路径
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Shorts {
            input,
            output,
            config: config_file,
            count,
            max_shorts,
            clip_length,
            preset,
            threads,
            frame_rate,
        } => {
            init_logging(config_file.as_deref())?;
            let overrides = ConfigOverrides {
                clip_length,
                max_shorts,
                preset,
                threads,
                frame_rate,
                ..ConfigOverrides::default()
            };
            run_shorts(&input, &output, config_file.as_deref(), &overrides, count)?;
        }
        Commands::Highlights {
            input,
            config: config_file,
            threshold,
            merge_gap,
        } => {
            init_logging(config_file.as_deref())?;
            let overrides = ConfigOverrides {
                motion_threshold: threshold,
                ..ConfigOverrides::default()
            };
            let config = ConfigLoader::load_config(config_file.as_deref(), &overrides)
                .context("加载配置失败")?;

            // 阈值已经合并进配置
            let output = detect_highlights(&input, None, merge_gap, &config)
                .context("高光检测失败")?;
            let response = video_shorts::payload::HighlightsResponse::from_output(output);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Serve {
            bind,
            config: config_file,
        } => {
            init_logging(config_file.as_deref())?;
            start_web_server(config_file.as_deref(), bind).await?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path)?;
            // 读回一遍，确认生成的文件可以被解析
            let config = ConfigLoader::load_from_file(&path)?;
            println!(
                "已生成配置文件: {} (default_shorts={}, max_shorts={}, clip_length={:.1}s)",
                path.display(),
                config.default_shorts,
                config.max_shorts,
                config.clip_length
            );
        }
    }

    Ok(())
}

/// 日志级别取自配置文件 [logging] 段或环境变量 VIDEO_SHORTS_LOG_LEVEL
fn init_logging(config_file: Option<&Path>) -> Result<()> {
    let server = ConfigLoader::load_server_config(config_file, None).context("加载配置失败")?;
    let level = server.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
    Ok(())
}

fn run_shorts(
    input: &Path,
    output: &Path,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
    count: Option<i64>,
) -> Result<()> {
    let config = ConfigLoader::load_config(config_file, overrides).context("加载配置失败")?;
    println!(
        "使用配置: clip_length={:.1}s, max_shorts={}, preset={}",
        config.clip_length, config.max_shorts, config.encode.preset
    );

    // 片段先编码到临时目录，再写入输出目录
    let work_dir = tempfile::tempdir().context("创建临时目录失败")?;
    let extractor = FfmpegExtractor::new(work_dir.path());
    let request = ShortsRequest {
        requested_count: count,
        ..ShortsRequest::default()
    };

    let report = process_shorts(&FfmpegProbe, &extractor, input, &request, &config)
        .context("处理视频失败")?;
    let manifest = write_shorts(&report, input, output)?;

    for line in &manifest.diagnostics {
        eprintln!("{}", line);
    }
    if !manifest.success {
        bail!("没有成功生成任何短视频，详情见 {}", output.join("report.json").display());
    }

    println!(
        "生成 {} 个短视频，输出目录: {}",
        manifest.clips_created,
        output.display()
    );
    Ok(())
}

async fn start_web_server(config_file: Option<&Path>, bind: Option<String>) -> Result<()> {
    let server = ConfigLoader::load_server_config(config_file, bind).context("加载服务配置失败")?;
    let process = ProcessConfig::from_env_and_file(config_file).context("加载配置失败")?;
    let bind = server.bind.clone();

    let state = Arc::new(AppState::new(process, server)?);
    let app = handler::router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 生成短视频: POST http://{}/process_video", bind);
    tracing::info!("  • 高光检测: POST http://{}/detect_highlights", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
