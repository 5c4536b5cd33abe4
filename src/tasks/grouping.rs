use crate::{
    domain::{GroupId, LabelColor, TabId, WindowId},
    platform::{PlatformError, TabPlatform},
};

/// Puts the tab into the window's group titled `title`, creating and styling
/// the group when none exists yet. Repeated calls with the same title in the
/// same window accumulate tabs into one group.
pub async fn group_tab(
    platform: &dyn TabPlatform,
    tab_id: TabId,
    window_id: WindowId,
    title: &str,
    color: LabelColor,
) -> Result<GroupId, PlatformError> {
    let groups = platform.query_groups(window_id).await?;
    if let Some(existing) = groups.iter().find(|g| g.title == title) {
        platform.add_to_group(existing.id, &[tab_id]).await?;
        return Ok(existing.id);
    }

    let group_id = platform.create_group(window_id, &[tab_id]).await?;
    platform.update_group(group_id, title, color).await?;
    Ok(group_id)
}
