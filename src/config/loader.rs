use std::{env, time::Duration};

use crate::db::classification_log::DEFAULT_CAPACITY;

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, GroupingConfig, LoggingConfig, ProviderEndpoints,
};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            db_filename: env::var("DB_FILENAME").unwrap_or_else(|_| "tab-grouper.db".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            classification_log_capacity: parse_number("LOG_CAPACITY")?
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_CAPACITY),
        };

        let defaults = GroupingConfig::default();
        let grouping = GroupingConfig {
            tab_cooldown: parse_number("TAB_COOLDOWN_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.tab_cooldown),
            regroup_debounce: parse_number("REGROUP_DEBOUNCE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.regroup_debounce),
        };

        let providers = ProviderEndpoints {
            openai: non_empty("OPENAI_BASE_URL"),
            gemini: non_empty("GEMINI_BASE_URL"),
            deepseek: non_empty("DEEPSEEK_BASE_URL"),
            zhipu: non_empty("ZHIPU_BASE_URL"),
            openrouter: non_empty("OPENROUTER_BASE_URL"),
        };

        Ok(Self {
            directories,
            logging,
            grouping,
            providers,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(None),
    }
}
