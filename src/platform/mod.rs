use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{GroupId, LabelColor, TabGroup, TabId, TabSnapshot, WindowId};

mod mirror;

pub use mirror::{GroupMutation, MirrorBrowser};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("no tab with id {0}")]
    TabNotFound(TabId),
    #[error("no tab group with id {0}")]
    GroupNotFound(GroupId),
}

/// The browser's tab and tab-group primitives the engine drives.
#[async_trait]
pub trait TabPlatform: Send + Sync {
    async fn list_windows(&self) -> Result<Vec<WindowId>, PlatformError>;

    /// Tabs of one window, or of every window when `window` is `None`.
    async fn query_tabs(&self, window: Option<WindowId>) -> Result<Vec<TabSnapshot>, PlatformError>;

    async fn query_groups(&self, window: WindowId) -> Result<Vec<TabGroup>, PlatformError>;

    async fn create_group(&self, window: WindowId, tabs: &[TabId]) -> Result<GroupId, PlatformError>;

    async fn add_to_group(&self, group: GroupId, tabs: &[TabId]) -> Result<(), PlatformError>;

    async fn update_group(
        &self,
        group: GroupId,
        title: &str,
        color: LabelColor,
    ) -> Result<(), PlatformError>;

    async fn ungroup(&self, tabs: &[TabId]) -> Result<(), PlatformError>;

    async fn remove_tabs(&self, tabs: &[TabId]) -> Result<(), PlatformError>;
}
