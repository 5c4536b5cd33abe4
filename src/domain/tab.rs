use serde::{Deserialize, Serialize};

use super::label::LabelColor;

pub type TabId = i64;
pub type WindowId = i64;
pub type GroupId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    #[default]
    Loading,
    Complete,
    Unloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub incognito: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub status: TabStatus,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl TabSnapshot {
    pub fn new(id: TabId, window_id: WindowId, url: &str, title: &str) -> Self {
        Self {
            id,
            window_id,
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            pinned: false,
            incognito: false,
            active: false,
            status: TabStatus::Complete,
            group_id: None,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.group_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabGroup {
    pub id: GroupId,
    pub window_id: WindowId,
    #[serde(default)]
    pub title: String,
    pub color: LabelColor,
}
