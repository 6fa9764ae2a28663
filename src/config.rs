use anyhow::{Context, Result};
use dotenv::dotenv;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

const CONFIG_PATH_ENV: &str = "SNAPCUBE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "./config.json";
const ENV_PREFIX: &str = "SNAPCUBE_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Address rocket binds to, `host:port`
    pub listen: String,
    pub ffmpeg: FfmpegConfig,
    pub nona: NonaConfig,
    /// Which storage backend receives uploads
    pub storage: StorageBackend,
    pub s3: S3Config,
    #[serde(rename = "aliyun-oss")]
    pub oss: OssConfig,
    /// Parent directory of every job workspace
    #[serde(rename = "temp")]
    pub temp_path: PathBuf,
    /// Cap applied to the height of extracted frames
    pub max_video_height: u32,
    /// Largest `splitSize` a request may ask for
    pub max_split_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            ffmpeg: FfmpegConfig::default(),
            nona: NonaConfig::default(),
            storage: StorageBackend::S3,
            s3: S3Config::default(),
            oss: OssConfig::default(),
            temp_path: PathBuf::from("./temp"),
            max_video_height: 720,
            max_split_size: 360,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NonaConfig {
    pub bin: String,
    pub use_gpu: bool,
}

impl Default for NonaConfig {
    fn default() -> Self {
        Self {
            bin: "nona".to_string(),
            use_gpu: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Oss,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct S3Config {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services, e.g. `https://minio.local:9000`
    pub endpoint: Option<String>,
    #[serde(rename = "prefix")]
    pub prefix_path: String,
    pub vr360_prefix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OssConfig {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// e.g. `oss-cn-hongkong.aliyuncs.com`
    pub endpoint: String,
    /// e.g. `cn-hongkong`
    pub region: String,
    #[serde(rename = "prefix")]
    pub prefix_path: String,
    pub vr360_prefix: String,
}

/// Scalar settings that may be overridden with `SNAPCUBE_*` variables.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    listen: Option<String>,
    temp: Option<PathBuf>,
    max_video_height: Option<u32>,
    max_split_size: Option<usize>,
    storage: Option<StorageBackend>,
    ffmpeg_bin: Option<String>,
    ffprobe_bin: Option<String>,
    nona_bin: Option<String>,
    nona_use_gpu: Option<bool>,
    s3_access_key: Option<String>,
    s3_secret_key: Option<String>,
    oss_access_key: Option<String>,
    oss_secret_key: Option<String>,
}

impl AppConfig {
    /// Reads `config.json` (or `$SNAPCUBE_CONFIG`) then applies environment overrides.
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = match File::open(&path) {
            Ok(file) => {
                info!("Loading config from {}", path);
                serde_json::from_reader(file)
                    .context(format!("failed to parse config file {}", path))?
            }
            Err(_) => {
                info!("No config file at {}, using defaults", path);
                AppConfig::default()
            }
        };

        let overrides = envy::prefixed(ENV_PREFIX)
            .from_env::<EnvOverrides>()
            .context("failed to read SNAPCUBE_* environment variables")?;
        config.apply(overrides);

        Ok(config)
    }

    fn apply(&mut self, env: EnvOverrides) {
        if let Some(v) = env.listen {
            self.listen = v;
        }
        if let Some(v) = env.temp {
            self.temp_path = v;
        }
        if let Some(v) = env.max_video_height {
            self.max_video_height = v;
        }
        if let Some(v) = env.max_split_size {
            self.max_split_size = v;
        }
        if let Some(v) = env.storage {
            self.storage = v;
        }
        if let Some(v) = env.ffmpeg_bin {
            self.ffmpeg.ffmpeg = v;
        }
        if let Some(v) = env.ffprobe_bin {
            self.ffmpeg.ffprobe = v;
        }
        if let Some(v) = env.nona_bin {
            self.nona.bin = v;
        }
        if let Some(v) = env.nona_use_gpu {
            self.nona.use_gpu = v;
        }
        if let Some(v) = env.s3_access_key {
            self.s3.access_key = v;
        }
        if let Some(v) = env.s3_secret_key {
            self.s3.secret_key = v;
        }
        if let Some(v) = env.oss_access_key {
            self.oss.access_key = v;
        }
        if let Some(v) = env.oss_secret_key {
            self.oss.secret_key = v;
        }
    }

    /// Splits `listen` into the address and port rocket expects.
    pub fn address_and_port(&self) -> Result<(String, u16)> {
        let (host, port) = self
            .listen
            .rsplit_once(':')
            .context(format!("listen address {:?} has no port", self.listen))?;
        let port = port
            .parse::<u16>()
            .context(format!("invalid port in listen address {:?}", self.listen))?;
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        Ok((host.to_string(), port))
    }

    /// Prefix under which panorama pyramids and their configs are stored.
    pub fn vr360_prefix(&self) -> &str {
        match self.storage {
            StorageBackend::S3 => &self.s3.vr360_prefix,
            StorageBackend::Oss => &self.oss.vr360_prefix,
        }
    }

    /// Prefix for frame uploads and player configs.
    pub fn default_prefix(&self) -> &str {
        match self.storage {
            StorageBackend::S3 => &self.s3.prefix_path,
            StorageBackend::Oss => &self.oss.prefix_path,
        }
    }
}

/// Loads the configuration into [`APP_CONFIG`]. Later calls return the first value.
pub fn init_config() -> Result<&'static AppConfig> {
    if let Some(config) = APP_CONFIG.get() {
        return Ok(config);
    }
    let config = AppConfig::load()?;
    Ok(APP_CONFIG.get_or_init(|| config))
}
