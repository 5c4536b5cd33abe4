pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, GroupingConfig, ProviderEndpoints};
pub use loader::load_config;
