use std::collections::HashMap;

use crate::{GlobalConfig, StreamConfig};

/// 只读的流配置查询接口
pub trait ConfigProvider: Send + Sync {
    fn stream_config(&self, name: &str) -> Option<StreamConfig>;

    fn stream_names(&self) -> Vec<String>;
}

/// 基于内存快照的配置提供者
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    streams: HashMap<String, StreamConfig>,
}

impl StaticConfigProvider {
    pub fn new(streams: impl IntoIterator<Item = StreamConfig>) -> Self {
        Self {
            streams: streams
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }
}

impl From<&GlobalConfig> for StaticConfigProvider {
    fn from(global: &GlobalConfig) -> Self {
        Self::new(global.streams.iter().cloned())
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn stream_config(&self, name: &str) -> Option<StreamConfig> {
        self.streams.get(name).cloned()
    }

    fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.keys().cloned().collect();
        names.sort();
        names
    }
}
