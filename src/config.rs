use anyhow::Result;
use configparser::ini::Ini;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::processor::ProcessConfig;

/// 默认配置文件名
const CONFIG_FILE_NAME: &str = "video-shorts.ini";
/// 环境变量前缀
const ENV_PREFIX: &str = "VIDEO_SHORTS_";

/// 服务相关配置（监听地址、上传大小、临时目录、日志级别）
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 监听地址
    pub bind: String,
    /// 请求体大小上限（MB），base64 编码的视频会比原文件大三分之一
    pub max_upload_mb: usize,
    /// 每个请求的临时目录都建在这里
    pub work_dir: PathBuf,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            max_upload_mb: 512,
            work_dir: env::temp_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// 命令行参数中可以覆盖的配置项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub clip_length: Option<f64>,
    pub max_shorts: Option<u32>,
    pub motion_threshold: Option<f64>,
    pub preset: Option<String>,
    pub threads: Option<u32>,
    pub frame_rate: Option<f64>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<ProcessConfig> {
        // 1. 先加载配置文件（如果存在）
        let ini = match config_file {
            Some(config_path) => Some(Self::read_ini(config_path)?),
            None => Self::find_default_config().and_then(|path| Self::read_ini(&path).ok()),
        };

        let mut config = ProcessConfig::default();
        if let Some(ini) = &ini {
            Self::apply_ini(&mut config, ini);
        }

        // 2. 环境变量
        Self::apply_env(&mut config, |key| env::var(key).ok());

        // 3. 命令行参数
        Self::apply_overrides(&mut config, overrides);

        Ok(config)
    }

    /// 从指定 INI 文件加载视频处理配置（不读取环境变量）
    pub fn load_from_file(config_path: &Path) -> Result<ProcessConfig> {
        let ini = Self::read_ini(config_path)?;
        let mut config = ProcessConfig::default();
        Self::apply_ini(&mut config, &ini);
        Ok(config)
    }

    /// 加载服务配置
    pub fn load_server_config(config_file: Option<&Path>, bind: Option<String>) -> Result<ServerConfig> {
        let ini = match config_file {
            Some(config_path) => Some(Self::read_ini(config_path)?),
            None => Self::find_default_config().and_then(|path| Self::read_ini(&path).ok()),
        };

        let mut config = ServerConfig::default();
        if let Some(ini) = &ini {
            Self::apply_server_ini(&mut config, ini);
        }
        Self::apply_server_env(&mut config, |key| env::var(key).ok());
        if let Some(bind) = bind {
            config.bind = bind;
        }

        Ok(config)
    }

    fn read_ini(config_path: &Path) -> Result<Ini> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut ini = Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;
        Ok(ini)
    }

    /// 按顺序查找默认配置文件：当前目录、当前目录隐藏文件、用户主目录、/etc
    fn find_default_config() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from(format!(".{}", CONFIG_FILE_NAME)),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(format!(".{}", CONFIG_FILE_NAME)));
        }
        candidates.push(PathBuf::from("/etc").join(CONFIG_FILE_NAME));

        candidates.into_iter().find(|path| path.exists())
    }

    fn apply_ini(config: &mut ProcessConfig, ini: &Ini) {
        set_if(&mut config.default_shorts, ini_value(ini, "shorts", "default_shorts"));
        set_if(&mut config.max_shorts, ini_value(ini, "shorts", "max_shorts"));
        set_if(&mut config.clip_length, ini_value(ini, "shorts", "clip_length"));
        set_if(&mut config.min_source_duration, ini_value(ini, "shorts", "min_source_duration"));
        set_if(&mut config.min_segment_length, ini_value(ini, "shorts", "min_segment_length"));
        set_if(&mut config.max_offset, ini_value(ini, "shorts", "max_offset"));
        set_if(&mut config.offset_ratio, ini_value(ini, "shorts", "offset_ratio"));
        set_if(&mut config.target_width, ini_value(ini, "shorts", "target_width"));
        set_if(&mut config.target_height, ini_value(ini, "shorts", "target_height"));

        set_if(&mut config.motion_threshold, ini_value(ini, "highlights", "motion_threshold"));
        set_if(&mut config.blur_kernel, ini_value(ini, "highlights", "blur_kernel"));

        set_if(&mut config.encode.codec, ini_value(ini, "encode", "codec"));
        set_if(&mut config.encode.audio_codec, ini_value(ini, "encode", "audio_codec"));
        set_if(&mut config.encode.preset, ini_value(ini, "encode", "preset"));
        if let Some(frame_rate) = ini_value(ini, "encode", "frame_rate") {
            config.encode.frame_rate = Some(frame_rate);
        }
        if let Some(threads) = ini_value(ini, "encode", "threads") {
            config.encode.threads = Some(threads);
        }
    }

    fn apply_env(config: &mut ProcessConfig, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        set_if(&mut config.default_shorts, parse_opt(var("DEFAULT_COUNT")));
        set_if(&mut config.max_shorts, parse_opt(var("MAX_COUNT")));
        set_if(&mut config.clip_length, parse_opt(var("CLIP_LENGTH")));
        set_if(&mut config.min_source_duration, parse_opt(var("MIN_SOURCE_DURATION")));
        set_if(&mut config.min_segment_length, parse_opt(var("MIN_SEGMENT_LENGTH")));
        set_if(&mut config.max_offset, parse_opt(var("MAX_OFFSET")));
        set_if(&mut config.offset_ratio, parse_opt(var("OFFSET_RATIO")));
        set_if(&mut config.target_width, parse_opt(var("TARGET_WIDTH")));
        set_if(&mut config.target_height, parse_opt(var("TARGET_HEIGHT")));
        set_if(&mut config.motion_threshold, parse_opt(var("MOTION_THRESHOLD")));
        set_if(&mut config.blur_kernel, parse_opt(var("BLUR_KERNEL")));
        set_if(&mut config.encode.codec, parse_opt(var("CODEC")));
        set_if(&mut config.encode.audio_codec, parse_opt(var("AUDIO_CODEC")));
        set_if(&mut config.encode.preset, parse_opt(var("PRESET")));
        if let Some(frame_rate) = parse_opt(var("FRAME_RATE")) {
            config.encode.frame_rate = Some(frame_rate);
        }
        if let Some(threads) = parse_opt(var("THREADS")) {
            config.encode.threads = Some(threads);
        }
    }

    fn apply_overrides(config: &mut ProcessConfig, overrides: &ConfigOverrides) {
        set_if(&mut config.clip_length, overrides.clip_length);
        set_if(&mut config.max_shorts, overrides.max_shorts);
        set_if(&mut config.motion_threshold, overrides.motion_threshold);
        set_if(&mut config.encode.preset, overrides.preset.clone());
        if overrides.threads.is_some() {
            config.encode.threads = overrides.threads;
        }
        if overrides.frame_rate.is_some() {
            config.encode.frame_rate = overrides.frame_rate;
        }
    }

    fn apply_server_ini(config: &mut ServerConfig, ini: &Ini) {
        set_if(&mut config.bind, ini_value(ini, "server", "bind"));
        set_if(&mut config.max_upload_mb, ini_value(ini, "server", "max_upload_mb"));
        set_if(&mut config.work_dir, ini_value(ini, "server", "work_dir"));
        set_if(&mut config.log_level, ini_value(ini, "logging", "level"));
    }

    fn apply_server_env(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
        // 部署平台通常只提供 PORT
        if let Some(port) = parse_opt::<u16>(lookup("PORT")) {
            config.bind = format!("0.0.0.0:{}", port);
        }
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        set_if(&mut config.bind, parse_opt(var("BIND")));
        set_if(&mut config.max_upload_mb, parse_opt(var("MAX_UPLOAD_MB")));
        set_if(&mut config.work_dir, parse_opt(var("WORK_DIR")));
        set_if(&mut config.log_level, parse_opt(var("LOG_LEVEL")));
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = ProcessConfig::default();
        let server = ServerConfig::default();

        let mut ini = Ini::new();
        let mut put = |section: &str, key: &str, value: String| {
            ini.set(section, key, Some(value));
        };

        put("shorts", "default_shorts", defaults.default_shorts.to_string());
        put("shorts", "max_shorts", defaults.max_shorts.to_string());
        put("shorts", "clip_length", defaults.clip_length.to_string());
        put("shorts", "min_source_duration", defaults.min_source_duration.to_string());
        put("shorts", "min_segment_length", defaults.min_segment_length.to_string());
        put("shorts", "max_offset", defaults.max_offset.to_string());
        put("shorts", "offset_ratio", defaults.offset_ratio.to_string());
        put("shorts", "target_width", defaults.target_width.to_string());
        put("shorts", "target_height", defaults.target_height.to_string());
        put("highlights", "motion_threshold", defaults.motion_threshold.to_string());
        put("highlights", "blur_kernel", defaults.blur_kernel.to_string());
        put("encode", "codec", defaults.encode.codec.clone());
        put("encode", "audio_codec", defaults.encode.audio_codec.clone());
        put("encode", "preset", defaults.encode.preset.clone());
        put("encode", "frame_rate", String::new());
        put("encode", "threads", String::new());
        put("server", "bind", server.bind.clone());
        put("server", "max_upload_mb", server.max_upload_mb.to_string());
        put("server", "work_dir", String::new());
        put("logging", "level", server.log_level.clone());

        ini.write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

/// 读取 INI 值，空字符串视为未设置
fn ini_value<T: FromStr>(ini: &Ini, section: &str, key: &str) -> Option<T> {
    parse_opt(ini.get(section, key))
}

fn parse_opt<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}

fn set_if<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
