use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::{GroupId, LabelColor, TabGroup, TabId, TabSnapshot, WindowId};

use super::{PlatformError, TabPlatform};

/// A group change decided by the engine, replayed by the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GroupMutation {
    Create {
        group_id: GroupId,
        window_id: WindowId,
        tab_ids: Vec<TabId>,
    },
    Add {
        group_id: GroupId,
        tab_ids: Vec<TabId>,
    },
    Update {
        group_id: GroupId,
        title: String,
        color: LabelColor,
    },
    Ungroup {
        tab_ids: Vec<TabId>,
    },
    RemoveTabs {
        tab_ids: Vec<TabId>,
    },
}

#[derive(Default)]
struct BrowserState {
    tabs: BTreeMap<TabId, TabSnapshot>,
    groups: BTreeMap<GroupId, TabGroup>,
    next_group_id: GroupId,
}

impl BrowserState {
    fn tab_mut(&mut self, id: TabId) -> Result<&mut TabSnapshot, PlatformError> {
        self.tabs.get_mut(&id).ok_or(PlatformError::TabNotFound(id))
    }

    /// Groups the given tabs currently belong to.
    fn groups_of(&self, tabs: &[TabId]) -> Vec<GroupId> {
        tabs.iter()
            .filter_map(|id| self.tabs.get(id).and_then(|t| t.group_id))
            .collect()
    }

    /// Browsers drop groups that lost their last tab. Only `candidates` are
    /// checked, so groups reported before their tabs arrive survive.
    fn prune_empty_groups(&mut self, candidates: impl IntoIterator<Item = GroupId>) {
        for id in candidates {
            if !self.tabs.values().any(|t| t.group_id == Some(id)) {
                self.groups.remove(&id);
            }
        }
    }

    /// Keeps locally allocated ids clear of ids the browser already uses.
    fn reserve_group_id(&mut self, id: GroupId) {
        if id >= self.next_group_id {
            self.next_group_id = id + 1;
        }
    }
}

/// In-process view of the browser's tabs and groups, fed by tab events and
/// mutated by the engine. Every mutation is also published on the optional
/// channel so the extension can apply it.
pub struct MirrorBrowser {
    state: Mutex<BrowserState>,
    mutations: Option<mpsc::UnboundedSender<GroupMutation>>,
}

impl MirrorBrowser {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrowserState {
                next_group_id: 1,
                ..Default::default()
            }),
            mutations: None,
        }
    }

    pub fn with_mutation_channel(mutations: mpsc::UnboundedSender<GroupMutation>) -> Self {
        Self {
            mutations: Some(mutations),
            ..Self::new()
        }
    }

    /// Inserts or refreshes a tab. A group id reported by the browser wins;
    /// a missing one keeps the membership the mirror decided, since the
    /// browser may not have replayed it yet.
    pub fn upsert_tab(&self, mut tab: TabSnapshot) {
        let mut state = self.state.lock();
        let previous = state.tabs.get(&tab.id).and_then(|t| t.group_id);
        match tab.group_id.filter(|id| *id >= 0) {
            Some(group_id) => state.reserve_group_id(group_id),
            None => tab.group_id = previous,
        }
        let current = tab.group_id;
        state.tabs.insert(tab.id, tab);
        if previous != current {
            state.prune_empty_groups(previous);
        }
    }

    /// Records a group as the browser reports it, so later grouping can
    /// reuse it by title.
    pub fn upsert_group(&self, group: TabGroup) {
        let mut state = self.state.lock();
        state.reserve_group_id(group.id);
        state.groups.insert(group.id, group);
    }

    /// Forgets a group the browser removed. Its tabs become ungrouped.
    pub fn remove_group(&self, id: GroupId) -> Option<TabGroup> {
        let mut state = self.state.lock();
        for tab in state.tabs.values_mut() {
            if tab.group_id == Some(id) {
                tab.group_id = None;
            }
        }
        state.groups.remove(&id)
    }

    pub fn close_tab(&self, id: TabId) -> Option<TabSnapshot> {
        let mut state = self.state.lock();
        let removed = state.tabs.remove(&id);
        let previous = removed.as_ref().and_then(|t| t.group_id);
        state.prune_empty_groups(previous);
        removed
    }

    #[cfg(test)]
    pub fn tab(&self, id: TabId) -> Option<TabSnapshot> {
        self.state.lock().tabs.get(&id).cloned()
    }

    #[cfg(test)]
    pub fn groups(&self) -> Vec<TabGroup> {
        self.state.lock().groups.values().cloned().collect()
    }

    fn publish(&self, mutation: GroupMutation) {
        if let Some(tx) = &self.mutations {
            let _ = tx.send(mutation);
        }
    }
}

impl Default for MirrorBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TabPlatform for MirrorBrowser {
    async fn list_windows(&self) -> Result<Vec<WindowId>, PlatformError> {
        let state = self.state.lock();
        let mut windows: Vec<WindowId> = state.tabs.values().map(|t| t.window_id).collect();
        windows.sort_unstable();
        windows.dedup();
        Ok(windows)
    }

    async fn query_tabs(&self, window: Option<WindowId>) -> Result<Vec<TabSnapshot>, PlatformError> {
        let state = self.state.lock();
        Ok(state
            .tabs
            .values()
            .filter(|t| window.map_or(true, |w| t.window_id == w))
            .cloned()
            .collect())
    }

    async fn query_groups(&self, window: WindowId) -> Result<Vec<TabGroup>, PlatformError> {
        let state = self.state.lock();
        Ok(state
            .groups
            .values()
            .filter(|g| g.window_id == window)
            .cloned()
            .collect())
    }

    async fn create_group(&self, window: WindowId, tabs: &[TabId]) -> Result<GroupId, PlatformError> {
        let group_id = {
            let mut state = self.state.lock();
            for id in tabs {
                state.tab_mut(*id)?;
            }
            let previous = state.groups_of(tabs);
            let group_id = state.next_group_id;
            state.next_group_id += 1;
            state.groups.insert(
                group_id,
                TabGroup {
                    id: group_id,
                    window_id: window,
                    title: String::new(),
                    color: LabelColor::Grey,
                },
            );
            for id in tabs {
                let tab = state.tab_mut(*id)?;
                tab.group_id = Some(group_id);
                tab.window_id = window;
            }
            state.prune_empty_groups(previous);
            group_id
        };
        self.publish(GroupMutation::Create {
            group_id,
            window_id: window,
            tab_ids: tabs.to_vec(),
        });
        Ok(group_id)
    }

    async fn add_to_group(&self, group: GroupId, tabs: &[TabId]) -> Result<(), PlatformError> {
        {
            let mut state = self.state.lock();
            let window = state
                .groups
                .get(&group)
                .map(|g| g.window_id)
                .ok_or(PlatformError::GroupNotFound(group))?;
            for id in tabs {
                state.tab_mut(*id)?;
            }
            let previous = state.groups_of(tabs);
            for id in tabs {
                let tab = state.tab_mut(*id)?;
                tab.group_id = Some(group);
                tab.window_id = window;
            }
            state.prune_empty_groups(previous);
        }
        self.publish(GroupMutation::Add {
            group_id: group,
            tab_ids: tabs.to_vec(),
        });
        Ok(())
    }

    async fn update_group(
        &self,
        group: GroupId,
        title: &str,
        color: LabelColor,
    ) -> Result<(), PlatformError> {
        {
            let mut state = self.state.lock();
            let entry = state
                .groups
                .get_mut(&group)
                .ok_or(PlatformError::GroupNotFound(group))?;
            entry.title = title.to_string();
            entry.color = color;
        }
        self.publish(GroupMutation::Update {
            group_id: group,
            title: title.to_string(),
            color,
        });
        Ok(())
    }

    async fn ungroup(&self, tabs: &[TabId]) -> Result<(), PlatformError> {
        {
            let mut state = self.state.lock();
            let previous = state.groups_of(tabs);
            for id in tabs {
                state.tab_mut(*id)?.group_id = None;
            }
            state.prune_empty_groups(previous);
        }
        self.publish(GroupMutation::Ungroup {
            tab_ids: tabs.to_vec(),
        });
        Ok(())
    }

    async fn remove_tabs(&self, tabs: &[TabId]) -> Result<(), PlatformError> {
        {
            let mut state = self.state.lock();
            let previous = state.groups_of(tabs);
            for id in tabs {
                state.tabs.remove(id);
            }
            state.prune_empty_groups(previous);
        }
        self.publish(GroupMutation::RemoveTabs {
            tab_ids: tabs.to_vec(),
        });
        Ok(())
    }
}
