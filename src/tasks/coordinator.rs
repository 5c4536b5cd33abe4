use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::{
    sync::broadcast::error::RecvError,
    task::JoinHandle,
    time::Instant,
};
use url::Url;

use crate::{
    classifier::{Classifier, TabFacts},
    config::GroupingConfig,
    db::settings::{keys, SettingsRepository, StorageArea},
    domain::{DomainRule, TabId, TabSnapshot, TabStatus, WindowId},
    infrastructure::shutdown::ShutdownListener,
    labels::index_by_id,
    platform::{PlatformError, TabPlatform},
};

use super::{debounce::Debouncer, grouping::group_tab};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Incognito, pinned, missing url/title or not http(s).
    Ineligible,
    Cooldown,
    InFlight,
    AutoGroupDisabled,
    /// No rule matched and the model gave no usable answer.
    Unclassified,
    /// Neither the chosen label nor the default label exists.
    UnknownLabel,
    /// The tab went away before its group could be applied.
    TabClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Grouped { label_id: String, learned_rule: bool },
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
struct ProcessedTab {
    url: String,
    at: Instant,
}

/// Removes the tab from the in-flight set however processing ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<TabId>>,
    tab_id: TabId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.tab_id);
    }
}

pub(crate) fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Url and title of a tab the engine may group.
fn eligible(tab: &TabSnapshot) -> Option<(&str, &str)> {
    if tab.incognito || tab.pinned {
        return None;
    }
    let url = tab.url.as_deref().filter(|u| !u.is_empty())?;
    let title = tab.title.as_deref().filter(|t| !t.is_empty())?;
    is_http_url(url).then_some((url, title))
}

pub struct TabCoordinator {
    platform: Arc<dyn TabPlatform>,
    settings: Arc<SettingsRepository>,
    classifier: Classifier,
    cooldown: Duration,
    in_flight: Mutex<HashSet<TabId>>,
    processed: Mutex<HashMap<TabId, ProcessedTab>>,
    regroup_lock: tokio::sync::Mutex<()>,
    regroup_debounce: Debouncer,
}

impl TabCoordinator {
    pub fn new(
        platform: Arc<dyn TabPlatform>,
        settings: Arc<SettingsRepository>,
        classifier: Classifier,
        grouping: &GroupingConfig,
    ) -> Self {
        Self {
            platform,
            settings,
            classifier,
            cooldown: grouping.tab_cooldown,
            in_flight: Mutex::new(HashSet::new()),
            processed: Mutex::new(HashMap::new()),
            regroup_lock: tokio::sync::Mutex::new(()),
            regroup_debounce: Debouncer::new(grouping.regroup_debounce),
        }
    }

    fn within_cooldown(&self, tab_id: TabId, url: &str, now: Instant) -> bool {
        self.processed
            .lock()
            .get(&tab_id)
            .is_some_and(|p| p.url == url && now.duration_since(p.at) < self.cooldown)
    }

    fn begin(&self, tab_id: TabId) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .lock()
            .insert(tab_id)
            .then(|| InFlightGuard {
                set: &self.in_flight,
                tab_id,
            })
    }

    /// Classifies one tab and moves it into its label's group. `force`
    /// bypasses the cooldown and the auto-group switch.
    pub async fn process_tab(&self, tab: &TabSnapshot, force: bool) -> Result<ProcessOutcome> {
        let Some((url, title)) = eligible(tab) else {
            return Ok(ProcessOutcome::Skipped(SkipReason::Ineligible));
        };
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        else {
            return Ok(ProcessOutcome::Skipped(SkipReason::Ineligible));
        };

        let now = Instant::now();
        if !force && self.within_cooldown(tab.id, url, now) {
            tracing::trace!(target: "coordinator", tab_id = tab.id, "within cooldown");
            return Ok(ProcessOutcome::Skipped(SkipReason::Cooldown));
        }
        let Some(_guard) = self.begin(tab.id) else {
            tracing::trace!(target: "coordinator", tab_id = tab.id, "already in flight");
            return Ok(ProcessOutcome::Skipped(SkipReason::InFlight));
        };

        let mut sync = self.settings.load_sync().await?;
        if !force && !sync.auto_group {
            return Ok(ProcessOutcome::Skipped(SkipReason::AutoGroupDisabled));
        }
        let local = self.settings.load_local().await?;

        let facts = TabFacts {
            title,
            url,
            host: &host,
        };
        let Some(classification) = self.classifier.resolve(facts, &mut sync, &local).await? else {
            return Ok(ProcessOutcome::Skipped(SkipReason::Unclassified));
        };

        let label = {
            let by_id = index_by_id(&sync.labels);
            by_id
                .get(classification.label_id.as_str())
                .or_else(|| by_id.get(sync.default_label_id.as_str()))
                .map(|l| (*l).clone())
        };
        let Some(label) = label else {
            tracing::warn!(target: "coordinator", tab_id = tab.id, label_id = %classification.label_id, "label vanished before grouping");
            return Ok(ProcessOutcome::Skipped(SkipReason::UnknownLabel));
        };

        match group_tab(self.platform.as_ref(), tab.id, tab.window_id, &label.name, label.color).await {
            Ok(_) => {}
            Err(PlatformError::TabNotFound(_)) => {
                tracing::debug!(target: "coordinator", tab_id = tab.id, "tab closed before grouping");
                return Ok(ProcessOutcome::Skipped(SkipReason::TabClosed));
            }
            Err(err) => return Err(err.into()),
        }

        let learned_rule = classification.ai_succeeded && sync.domain_rules_enabled;
        if learned_rule {
            // Learned rules use the raw hostname, unlike rules typed by the user.
            sync.domain_rules.insert(host.clone(), DomainRule::new(label.id.clone()));
            self.settings
                .save_sync(&sync, &[keys::DOMAIN_RULES, keys::LABELS])
                .await?;
        }

        self.processed.lock().insert(
            tab.id,
            ProcessedTab {
                url: url.to_string(),
                at: now,
            },
        );
        tracing::info!(target: "coordinator", tab_id = tab.id, %host, label = %label.name, learned_rule, "tab grouped");

        Ok(ProcessOutcome::Grouped {
            label_id: label.id,
            learned_rule,
        })
    }

    /// Drops per-tab state for a closed tab.
    pub fn forget_tab(&self, tab_id: TabId) {
        self.processed.lock().remove(&tab_id);
        self.in_flight.lock().remove(&tab_id);
    }

    /// Force-processes every loaded tab of the window, one at a time.
    /// Returns how many tabs were grouped.
    pub async fn regroup_window(&self, window: WindowId) -> Result<usize> {
        let tabs = self.platform.query_tabs(Some(window)).await?;
        let mut grouped = 0;
        for tab in tabs.iter().filter(|t| t.status == TabStatus::Complete) {
            if let ProcessOutcome::Grouped { .. } = self.process_tab(tab, true).await? {
                grouped += 1;
            }
        }
        tracing::info!(target: "coordinator", window, grouped, "window regrouped");
        Ok(grouped)
    }

    /// Regroups every window. Concurrent calls queue up behind each other.
    pub async fn regroup_all_windows(&self) -> Result<usize> {
        let _lock = self.regroup_lock.lock().await;
        let mut grouped = 0;
        for window in self.platform.list_windows().await? {
            grouped += self.regroup_window(window).await?;
        }
        Ok(grouped)
    }

    fn schedule_regroup(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        self.regroup_debounce.trigger(move || async move {
            if let Err(err) = coordinator.regroup_all_windows().await {
                tracing::error!(target: "coordinator", error = %err, "regroup after settings change failed");
            }
        });
    }

    async fn on_sync_change(self: &Arc<Self>) {
        let mut patch = Map::new();
        patch.insert(
            keys::LAST_SYNC_UPDATE_AT.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        if let Err(err) = self.settings.set(StorageArea::Local, patch).await {
            tracing::warn!(target: "coordinator", error = %err, "failed to record sync update time");
        }
        self.schedule_regroup();
    }

    /// Regroups everything, debounced, whenever synced labels or rules change.
    pub fn spawn_settings_watcher(self: &Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut changes = self.settings.subscribe();
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    change = changes.recv() => change,
                    _ = shutdown.notified() => break,
                };
                match change {
                    Ok(change) => {
                        if change.area == StorageArea::Sync && change.touches_any(&keys::REGROUP_TRIGGERS) {
                            coordinator.on_sync_change().await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "coordinator", skipped, "settings watcher lagged; regrouping");
                        coordinator.on_sync_change().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            coordinator.regroup_debounce.cancel();
            tracing::info!(target: "coordinator", "settings watcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        ai::ProviderClient,
        config::ProviderEndpoints,
        db::{classification_log::ClassificationLogRepository, memory_pool, settings::api_key_storage_key},
        domain::ProviderKind,
        infrastructure::shutdown::Shutdown,
        platform::MirrorBrowser,
    };

    struct Fixture {
        coordinator: Arc<TabCoordinator>,
        browser: Arc<MirrorBrowser>,
        settings: Arc<SettingsRepository>,
    }

    async fn fixture(server: &MockServer, grouping: GroupingConfig) -> Fixture {
        let pool = memory_pool().await;
        let settings = Arc::new(SettingsRepository::new(pool.clone()));
        settings.ensure_sync_defaults().await.unwrap();
        let mut key = Map::new();
        key.insert(api_key_storage_key(ProviderKind::OpenAi).into(), json!("sk-test"));
        settings.set(StorageArea::Local, key).await.unwrap();

        let logs = Arc::new(ClassificationLogRepository::new(pool, 200));
        let provider = Arc::new(ProviderClient::new(
            reqwest::Client::new(),
            ProviderEndpoints {
                openai: Some(server.uri()),
                ..Default::default()
            },
        ));
        let browser = Arc::new(MirrorBrowser::new());
        let classifier = Classifier::new(provider, settings.clone(), logs);
        let coordinator = Arc::new(TabCoordinator::new(
            browser.clone(),
            settings.clone(),
            classifier,
            &grouping,
        ));
        Fixture {
            coordinator,
            browser,
            settings,
        }
    }

    fn tab(id: TabId, url: &str) -> TabSnapshot {
        TabSnapshot::new(id, 1, url, "Some page")
    }

    fn answer(label: &str, delay: Duration) -> Mock {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "choices": [{ "message": { "content": format!(r#"{{"label":"{label}"}}"#) } }]
                    }))
                    .set_delay(delay),
            )
    }

    async fn add_rule(settings: &SettingsRepository, host: &str, label_id: &str) {
        let mut sync = settings.load_sync().await.unwrap();
        sync.domain_rules.insert(host.into(), DomainRule::new(label_id));
        settings.save_sync(&sync, &[keys::DOMAIN_RULES]).await.unwrap();
    }

    #[test]
    fn eligibility_filters_private_pinned_and_non_web_tabs() {
        assert!(eligible(&tab(1, "https://example.com")).is_some());
        assert!(eligible(&tab(1, "chrome://settings")).is_none());
        assert!(eligible(&TabSnapshot {
            incognito: true,
            ..tab(1, "https://example.com")
        })
        .is_none());
        assert!(eligible(&TabSnapshot {
            pinned: true,
            ..tab(1, "https://example.com")
        })
        .is_none());
        assert!(eligible(&TabSnapshot {
            title: None,
            ..tab(1, "https://example.com")
        })
        .is_none());
    }

    #[tokio::test]
    async fn domain_rule_groups_without_remote_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        add_rule(&fx.settings, "docs.example.com", "work").await;
        fx.browser.upsert_tab(tab(1, "https://docs.example.com/a"));

        let outcome = fx.coordinator.process_tab(&tab(1, "https://docs.example.com/a"), false).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Grouped {
                label_id: "work".into(),
                learned_rule: false
            }
        );
        let groups = fx.browser.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].title, "Work");
    }

    #[tokio::test]
    async fn learning_keeps_labels_with_unknown_colors() {
        let server = MockServer::start().await;
        answer("Work", Duration::ZERO).expect(1).mount(&server).await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        let mut stored = Map::new();
        stored.insert(
            keys::LABELS.into(),
            json!([
                { "id": "mine", "name": "My Research", "color": "blue" },
                { "id": "odd", "name": "Odd", "color": "magenta" },
            ]),
        );
        fx.settings.set(StorageArea::Sync, stored).await.unwrap();
        let t = tab(3, "https://research.example/paper");
        fx.browser.upsert_tab(t.clone());

        let outcome = fx.coordinator.process_tab(&t, false).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Grouped {
                label_id: "work".into(),
                learned_rule: true
            }
        );
        let ids: Vec<_> = fx
            .settings
            .load_sync()
            .await
            .unwrap()
            .labels
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, ["mine", "odd", "work"]);
    }

    #[tokio::test]
    async fn model_answer_groups_and_learns_rule() {
        let server = MockServer::start().await;
        answer("Video", Duration::ZERO).expect(1).mount(&server).await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        let t = tab(7, "https://www.videos.example/watch?v=1");
        fx.browser.upsert_tab(t.clone());

        let outcome = fx.coordinator.process_tab(&t, false).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Grouped {
                label_id: "video".into(),
                learned_rule: true
            }
        );
        let sync = fx.settings.load_sync().await.unwrap();
        assert_eq!(
            sync.domain_rules.get("www.videos.example").map(|r| r.label_id.as_str()),
            Some("video")
        );
    }

    #[tokio::test]
    async fn concurrent_calls_for_one_tab_run_once() {
        let server = MockServer::start().await;
        answer("Read", Duration::from_millis(200)).expect(1).mount(&server).await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        let t = tab(3, "https://news.example/story");
        fx.browser.upsert_tab(t.clone());

        let (a, b) = tokio::join!(
            fx.coordinator.process_tab(&t, false),
            fx.coordinator.process_tab(&t, false)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert!(outcomes.contains(&ProcessOutcome::Skipped(SkipReason::InFlight)));
        assert!(outcomes.iter().any(|o| matches!(o, ProcessOutcome::Grouped { .. })));
        assert!(fx.coordinator.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn cooldown_applies_to_same_url_unless_forced() {
        let server = MockServer::start().await;
        let fx = fixture(
            &server,
            GroupingConfig {
                tab_cooldown: Duration::from_millis(100),
                ..Default::default()
            },
        )
        .await;
        add_rule(&fx.settings, "shop.example", "shopping").await;
        let t = tab(4, "https://shop.example/cart");
        fx.browser.upsert_tab(t.clone());

        assert!(matches!(
            fx.coordinator.process_tab(&t, false).await.unwrap(),
            ProcessOutcome::Grouped { .. }
        ));
        assert_eq!(
            fx.coordinator.process_tab(&t, false).await.unwrap(),
            ProcessOutcome::Skipped(SkipReason::Cooldown)
        );
        assert!(matches!(
            fx.coordinator.process_tab(&t, true).await.unwrap(),
            ProcessOutcome::Grouped { .. }
        ));

        let moved = tab(4, "https://shop.example/checkout");
        assert!(matches!(
            fx.coordinator.process_tab(&moved, false).await.unwrap(),
            ProcessOutcome::Grouped { .. }
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(
            fx.coordinator.process_tab(&moved, false).await.unwrap(),
            ProcessOutcome::Grouped { .. }
        ));
        assert_eq!(fx.browser.groups().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_leaves_tab_ungrouped_and_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        let t = tab(5, "https://unknown.example/");
        fx.browser.upsert_tab(t.clone());

        for _ in 0..2 {
            assert_eq!(
                fx.coordinator.process_tab(&t, false).await.unwrap(),
                ProcessOutcome::Skipped(SkipReason::Unclassified)
            );
        }
        assert!(fx.browser.groups().is_empty());
        assert!(fx.coordinator.in_flight.lock().is_empty());
        assert!(fx.coordinator.processed.lock().is_empty());
    }

    #[tokio::test]
    async fn auto_group_switch_is_honoured_unless_forced() {
        let server = MockServer::start().await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        add_rule(&fx.settings, "docs.example.com", "work").await;
        let mut patch = Map::new();
        patch.insert(keys::AUTO_GROUP.into(), json!(false));
        fx.settings.set(StorageArea::Sync, patch).await.unwrap();
        let t = tab(6, "https://docs.example.com/");
        fx.browser.upsert_tab(t.clone());

        assert_eq!(
            fx.coordinator.process_tab(&t, false).await.unwrap(),
            ProcessOutcome::Skipped(SkipReason::AutoGroupDisabled)
        );
        assert!(matches!(
            fx.coordinator.process_tab(&t, true).await.unwrap(),
            ProcessOutcome::Grouped { .. }
        ));
    }

    #[tokio::test]
    async fn closed_tab_is_skipped_without_error() {
        let server = MockServer::start().await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        add_rule(&fx.settings, "docs.example.com", "work").await;

        let outcome = fx
            .coordinator
            .process_tab(&tab(9, "https://docs.example.com/"), false)
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::TabClosed));
    }

    #[tokio::test]
    async fn regroup_window_processes_loaded_tabs_only() {
        let server = MockServer::start().await;
        let fx = fixture(&server, GroupingConfig::default()).await;
        add_rule(&fx.settings, "docs.example.com", "work").await;
        add_rule(&fx.settings, "shop.example", "shopping").await;
        fx.browser.upsert_tab(tab(1, "https://docs.example.com/"));
        fx.browser.upsert_tab(tab(2, "https://shop.example/"));
        fx.browser.upsert_tab(TabSnapshot {
            status: TabStatus::Loading,
            ..tab(3, "https://docs.example.com/other")
        });

        assert_eq!(fx.coordinator.regroup_all_windows().await.unwrap(), 2);
        assert_eq!(fx.browser.groups().len(), 2);
        assert_eq!(fx.browser.tab(3).unwrap().group_id, None);
    }

    #[tokio::test]
    async fn rule_change_triggers_debounced_regroup() {
        let server = MockServer::start().await;
        let fx = fixture(
            &server,
            GroupingConfig {
                regroup_debounce: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .await;
        fx.browser.upsert_tab(tab(1, "https://docs.example.com/"));
        let (shutdown, _) = Shutdown::new();
        let watcher = fx.coordinator.spawn_settings_watcher(shutdown.subscribe());

        add_rule(&fx.settings, "docs.example.com", "work").await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(fx.browser.tab(1).unwrap().group_id.is_some());
        let local = fx.settings.get(StorageArea::Local, &[keys::LAST_SYNC_UPDATE_AT]).await.unwrap();
        assert!(local.contains_key(keys::LAST_SYNC_UPDATE_AT));

        shutdown.trigger();
        watcher.await.unwrap();
    }
}
