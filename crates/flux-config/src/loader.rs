use anyhow::{anyhow, Result};
use config::{Config, File, FileFormat};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{GlobalConfig, StreamConfig};

/// 配置加载器
///
/// 目录结构：
/// - `global.toml`：系统、日志、接入层参数，以及可选的 `[[streams]]`
/// - `streams/*.toml`：每个文件一路流
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }

    /// 加载全局配置（含 streams 目录下的流配置）
    pub fn load_global(&self) -> Result<GlobalConfig> {
        let config_path = self.config_dir.join("global.toml");

        let mut global = if config_path.exists() {
            let config = Config::builder()
                .add_source(File::new(
                    config_path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                    FileFormat::Toml,
                ))
                .build()?;
            config.try_deserialize()?
        } else {
            // 如果配置文件不存在，返回默认配置
            GlobalConfig::default()
        };

        global.streams.extend(self.load_streams()?);
        Ok(global)
    }

    /// 加载 streams 目录下的所有流配置，按文件名排序
    pub fn load_streams(&self) -> Result<Vec<StreamConfig>> {
        let dir = self.config_dir.join("streams");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut streams = Vec::with_capacity(paths.len());
        for path in paths {
            streams.push(Self::load_stream_file(&path)?);
        }
        Ok(streams)
    }

    fn load_stream_file(path: &Path) -> Result<StreamConfig> {
        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .build()?;

        config
            .try_deserialize()
            .map_err(|e| anyhow!("Invalid stream config {}: {}", path.display(), e))
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let global = self.load_global()?;
        validate_config(&global)
    }
}

/// 校验已加载的配置
pub fn validate_config(global: &GlobalConfig) -> Result<()> {
    let reconnect = &global.ingest.reconnect;
    if reconnect.base_delay_ms == 0 {
        return Err(anyhow!("reconnect.base_delay_ms must be greater than 0"));
    }
    if reconnect.base_delay_ms > reconnect.max_delay_ms {
        return Err(anyhow!(
            "reconnect.base_delay_ms ({}) cannot be greater than reconnect.max_delay_ms ({})",
            reconnect.base_delay_ms,
            reconnect.max_delay_ms
        ));
    }

    let distributor = &global.ingest.distributor;
    if distributor.capacity == 0 {
        return Err(anyhow!("distributor.capacity must be greater than 0"));
    }
    if distributor.max_consumers == 0 {
        return Err(anyhow!("distributor.max_consumers must be greater than 0"));
    }

    let mut names = HashSet::new();
    for stream in &global.streams {
        validate_stream(stream)?;
        if !names.insert(stream.name.as_str()) {
            return Err(anyhow!("Duplicate stream name: {}", stream.name));
        }
    }

    Ok(())
}

/// 校验单路流配置
pub fn validate_stream(stream: &StreamConfig) -> Result<()> {
    if stream.name.trim().is_empty() {
        return Err(anyhow!("Stream name cannot be empty"));
    }
    if stream.url.trim().is_empty() {
        return Err(anyhow!("Stream '{}' has an empty url", stream.name));
    }
    if !(0.0..=1.0).contains(&stream.detection.threshold) {
        return Err(anyhow!(
            "Stream '{}' detection threshold must be within 0.0-1.0",
            stream.name
        ));
    }
    Ok(())
}
