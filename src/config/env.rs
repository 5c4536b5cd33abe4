use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
    pub grouping: GroupingConfig,
    pub providers: ProviderEndpoints,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub data_dir: String,
    pub db_filename: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub classification_log_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct GroupingConfig {
    pub tab_cooldown: Duration,
    pub regroup_debounce: Duration,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            tab_cooldown: Duration::from_millis(10_000),
            regroup_debounce: Duration::from_millis(1_500),
        }
    }
}

/// Base URL overrides for the remote classification providers. `None` keeps
/// the provider's public endpoint.
#[derive(Debug, Clone, Default)]
pub struct ProviderEndpoints {
    pub openai: Option<String>,
    pub gemini: Option<String>,
    pub deepseek: Option<String>,
    pub zhipu: Option<String>,
    pub openrouter: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
