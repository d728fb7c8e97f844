use serde::{Deserialize, Serialize};

use crate::ingest::IngestConfig;
use crate::stream::StreamConfig;

/// 全局配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

/// 系统配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub name: String,
    pub version: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "FLUX NVR".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 默认过滤级别，RUST_LOG 优先
    #[serde(default = "default_level")]
    pub level: String,

    /// pretty 或 json
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            logging: LoggingConfig::default(),
            ingest: IngestConfig::default(),
            streams: Vec::new(),
        }
    }
}

impl GlobalConfig {
    /// 从 TOML 文本解析
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// 按名称查找流配置
    pub fn stream(&self, name: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_global_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.system.name, "FLUX NVR");
        assert_eq!(config.logging.level, "info");
        assert!(config.streams.is_empty());
    }

    #[test]
    fn test_from_toml_str() {
        let config = GlobalConfig::from_toml_str(
            r#"
[logging]
format = "json"

[[streams]]
name = "garage"
url = "rtsp://10.0.0.9/stream"
"#,
        )
        .unwrap();

        assert_eq!(config.logging.format, "json");
        assert_eq!(config.streams.len(), 1);
        assert!(config.stream("garage").is_some());
        assert!(config.stream("porch").is_none());
    }
}
