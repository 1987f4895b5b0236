use serde::Deserialize;
use std::path::{Path, PathBuf};

/// `<home>/config.toml`. Environment flags take precedence over every field.
#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub host: Option<HostCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HostCfg {
    pub transport: Option<String>, // "stdio" | "http"
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ping_secs: Option<u64>,
    pub http_json: Option<bool>,

    pub server_id: Option<String>,
    pub step_ttl_secs: Option<u64>, // 0 disables expiry
    pub weather_latency_ms: Option<u64>,

    pub seed_default_models: Option<bool>,
    pub deepseek_api_key: Option<String>,
    pub qwen_api_key: Option<String>,
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}
