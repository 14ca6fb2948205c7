use crate::error::{Result, SdError};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost";
pub const DEFAULT_PORT: u16 = 7000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 1000;

const SD_API_PATH: &str = "/sdapi/v1/";
const CONTROLNET_PATH: &str = "/controlnet/";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub output_folder: PathBuf,
    /// Only read by the experimental pose tooling, which is not part of this crate.
    pub pose_model_dir: Option<PathBuf>,
    pub timeout: Duration,
}

fn default_output_folder() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Pictures").join("blender"))
        .unwrap_or_else(env::temp_dir)
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            output_folder: default_output_folder(),
            pose_model_dir: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(address) = env::var("SD_ADDRESS") {
            if !address.trim().is_empty() {
                config.address = address.trim().to_string();
            }
        }

        match env::var("SD_PORT").ok().map(|s| s.parse::<u16>()) {
            Some(Ok(port)) if port > 0 => config.port = port,
            Some(_) => log::warn!("Ignoring invalid SD_PORT, using {}", config.port),
            None => {}
        }

        if let Ok(folder) = env::var("SD_OUTPUT_FOLDER") {
            config.output_folder = PathBuf::from(folder);
        }

        config.pose_model_dir = env::var("SD_POSE_MODEL_DIR").ok().map(PathBuf::from);

        match env::var("SD_TIMEOUT_SECS").ok().map(|s| s.parse::<u64>()) {
            Some(Ok(secs)) if secs > 0 => config.timeout = Duration::from_secs(secs),
            Some(_) => log::warn!(
                "Ignoring invalid SD_TIMEOUT_SECS, using {}s",
                config.timeout.as_secs()
            ),
            None => {}
        }

        config
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = folder.into();
        self
    }

    pub fn with_pose_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pose_model_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(SdError::Config("server address is empty".into()));
        }
        if self.port == 0 {
            return Err(SdError::Config("port must be between 1 and 65535".into()));
        }
        Ok(())
    }

    /// `http://{address}:{port}`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Root of the generation API, with a trailing slash.
    pub fn sd_host(&self) -> String {
        format!("{}{}", self.base_url(), SD_API_PATH)
    }

    pub fn controlnet_host(&self) -> String {
        format!("{}{}", self.base_url(), CONTROLNET_PATH)
    }
}
