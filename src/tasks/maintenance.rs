use std::collections::HashMap;

use url::Url;

use crate::{
    domain::{TabId, TabSnapshot, WindowId},
    platform::{PlatformError, TabPlatform},
};

use super::coordinator::is_http_url;

/// Removes every grouped tab of the window (or of all windows) from its
/// group. Returns how many tabs were ungrouped.
pub async fn ungroup_tabs(platform: &dyn TabPlatform, window: Option<WindowId>) -> Result<usize, PlatformError> {
    let grouped: Vec<TabId> = platform
        .query_tabs(window)
        .await?
        .iter()
        .filter(|t| t.is_grouped())
        .map(|t| t.id)
        .collect();
    if !grouped.is_empty() {
        platform.ungroup(&grouped).await?;
    }
    tracing::info!(target: "maintenance", ?window, count = grouped.len(), "tabs ungrouped");
    Ok(grouped.len())
}

/// Identity of a page for duplicate detection: the fragment and a trailing
/// slash are ignored, the query is not. Non-web urls compare verbatim.
pub fn normalize_tab_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return url.to_string();
    }
    parsed.set_fragment(None);
    let mut normalized = parsed.to_string();
    match normalized.find('?') {
        Some(q) if normalized[..q].ends_with('/') => {
            normalized.remove(q - 1);
        }
        None if normalized.ends_with('/') => {
            normalized.pop();
        }
        _ => {}
    }
    normalized
}

/// Tabs to close so each web page stays open once. Within a set of duplicates
/// the active tab is kept, else a pinned one, else the first seen. Pinned tabs
/// are never returned.
pub fn collect_duplicate_tabs(tabs: &[TabSnapshot]) -> Vec<TabId> {
    let mut by_page: HashMap<String, Vec<&TabSnapshot>> = HashMap::new();
    let mut order = Vec::new();
    for tab in tabs {
        let Some(url) = tab.url.as_deref().filter(|u| is_http_url(u)) else {
            continue;
        };
        let key = normalize_tab_url(url);
        let entry = by_page.entry(key.clone()).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push(tab);
    }

    let mut close = Vec::new();
    for key in order {
        let dupes = &by_page[&key];
        if dupes.len() < 2 {
            continue;
        }
        let keep = dupes
            .iter()
            .find(|t| t.active)
            .or_else(|| dupes.iter().find(|t| t.pinned))
            .unwrap_or(&dupes[0])
            .id;
        close.extend(dupes.iter().filter(|t| t.id != keep && !t.pinned).map(|t| t.id));
    }
    close
}

/// Closes duplicate tabs in the window, or across all windows when `window`
/// is `None`. Returns how many were closed.
pub async fn dedupe_tabs(platform: &dyn TabPlatform, window: Option<WindowId>) -> Result<usize, PlatformError> {
    let tabs = platform.query_tabs(window).await?;
    let close = collect_duplicate_tabs(&tabs);
    if !close.is_empty() {
        platform.remove_tabs(&close).await?;
    }
    tracing::info!(target: "maintenance", ?window, closed = close.len(), "duplicate tabs closed");
    Ok(close.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::LabelColor, platform::MirrorBrowser, tasks::grouping::group_tab};

    #[test]
    fn normalization_ignores_fragment_and_trailing_slash() {
        assert_eq!(normalize_tab_url("https://a.example/page/#top"), "https://a.example/page");
        assert_eq!(normalize_tab_url("https://a.example/"), "https://a.example");
        assert_eq!(normalize_tab_url("https://a.example/p/?q=1#x"), "https://a.example/p?q=1");
        assert_ne!(
            normalize_tab_url("https://a.example/p?q=1"),
            normalize_tab_url("https://a.example/p?q=2")
        );
        assert_eq!(normalize_tab_url("chrome://newtab/"), "chrome://newtab/");
    }

    #[test]
    fn keeps_active_then_pinned_then_first() {
        let base = |id| TabSnapshot::new(id, 1, "https://a.example/", "A");
        let tabs = vec![
            base(1),
            TabSnapshot { active: true, ..base(2) },
            TabSnapshot { url: Some("https://a.example#x".into()), ..base(3) },
        ];
        assert_eq!(collect_duplicate_tabs(&tabs), vec![1, 3]);

        let tabs = vec![base(1), TabSnapshot { pinned: true, ..base(2) }, base(3)];
        assert_eq!(collect_duplicate_tabs(&tabs), vec![1, 3]);

        let tabs = vec![
            TabSnapshot { active: true, ..base(1) },
            TabSnapshot { pinned: true, ..base(2) },
        ];
        assert!(collect_duplicate_tabs(&tabs).is_empty());

        assert_eq!(collect_duplicate_tabs(&[base(1), base(2)]), vec![2]);

        let internal = |id| TabSnapshot::new(id, 1, "chrome://newtab/", "New Tab");
        assert!(collect_duplicate_tabs(&[internal(1), internal(2)]).is_empty());
    }

    #[tokio::test]
    async fn dedupe_scope_follows_window_argument() {
        let browser = MirrorBrowser::new();
        browser.upsert_tab(TabSnapshot::new(1, 1, "https://a.example/", "A"));
        browser.upsert_tab(TabSnapshot::new(2, 1, "https://a.example", "A"));
        browser.upsert_tab(TabSnapshot::new(3, 2, "https://a.example/", "A"));

        assert_eq!(dedupe_tabs(&browser, Some(2)).await.unwrap(), 0);
        assert_eq!(dedupe_tabs(&browser, Some(1)).await.unwrap(), 1);
        assert!(browser.tab(2).is_none());

        assert_eq!(dedupe_tabs(&browser, None).await.unwrap(), 1);
        assert!(browser.tab(1).is_some());
        assert!(browser.tab(3).is_none());
    }

    #[tokio::test]
    async fn ungroup_counts_only_grouped_tabs() {
        let browser = MirrorBrowser::new();
        for id in 1..=3 {
            browser.upsert_tab(TabSnapshot::new(id, 1, "https://a.example/", "A"));
        }
        group_tab(&browser, 1, 1, "Work", LabelColor::Blue).await.unwrap();
        group_tab(&browser, 2, 1, "Read", LabelColor::Yellow).await.unwrap();

        assert_eq!(ungroup_tabs(&browser, Some(1)).await.unwrap(), 2);
        assert!(browser.groups().is_empty());
        assert_eq!(ungroup_tabs(&browser, None).await.unwrap(), 0);
    }
}
