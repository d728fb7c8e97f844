pub mod sampler;

pub use sampler::{LogSampler, SamplingStrategy};

use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    #[error("Unknown log format: {0}")]
    UnknownFormat(String),

    #[error("Failed to install subscriber: {0}")]
    InitError(String),
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

/// 日志初始化参数
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// 默认过滤规则，RUST_LOG 存在时以 RUST_LOG 为准
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingOptions {
    pub fn new(filter: impl Into<String>, format: &str) -> Result<Self, LoggingError> {
        Ok(Self {
            filter: filter.into(),
            format: format.parse()?,
        })
    }
}

/// 构建过滤器
pub fn build_filter(default_filter: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| LoggingError::InvalidFilter(default_filter.to_string(), e.to_string())),
    }
}

/// 初始化全局 tracing 订阅者
pub fn init_logging(options: &LoggingOptions) -> Result<(), LoggingError> {
    let filter = build_filter(&options.filter)?;

    let result = match options.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init(),
    };

    result.map_err(|e| LoggingError::InitError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_options_new() {
        let options = LoggingOptions::new("debug,flux_stream=trace", "json").unwrap();
        assert_eq!(options.format, LogFormat::Json);
        assert!(LoggingOptions::new("info", "yaml").is_err());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter("info").is_ok());
        assert!(build_filter("=[").is_err());
    }
}
