use std::sync::Arc;

use chrono::Utc;

use crate::{
    ai::{build_prompt, extract_label, PromptContext, ProviderClient},
    db::{
        classification_log::ClassificationLogRepository,
        settings::{keys, SettingsRepository},
        StorageError,
    },
    domain::{ClassificationLogEntry, LocalSettings, SyncSettings},
    labels::{create_label, find_id_by_name, index_by_id},
};

/// What the classifier knows about a tab.
#[derive(Debug, Clone, Copy)]
pub struct TabFacts<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub host: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub label_id: String,
    /// True when the remote model produced the label, false when an existing
    /// domain rule did. Only model answers are worth learning as new rules.
    pub ai_succeeded: bool,
}

/// Label of the enabled domain rule for `host`, if it points at a label that
/// still exists.
pub fn rule_label(sync: &SyncSettings, host: &str) -> Option<String> {
    if !sync.domain_rules_enabled {
        return None;
    }
    let rule = sync.domain_rules.get(host)?;
    index_by_id(&sync.labels)
        .contains_key(rule.label_id.as_str())
        .then(|| rule.label_id.clone())
}

pub struct Classifier {
    provider: Arc<ProviderClient>,
    settings: Arc<SettingsRepository>,
    logs: Arc<ClassificationLogRepository>,
}

impl Classifier {
    pub fn new(
        provider: Arc<ProviderClient>,
        settings: Arc<SettingsRepository>,
        logs: Arc<ClassificationLogRepository>,
    ) -> Self {
        Self {
            provider,
            settings,
            logs,
        }
    }

    /// Decides a label for the tab. `Ok(None)` means "cannot classify right
    /// now" (no key, no model, provider failure, unusable answer) and is not
    /// an error. New labels proposed by the model are appended to
    /// `sync.labels` and persisted before returning.
    pub async fn resolve(
        &self,
        tab: TabFacts<'_>,
        sync: &mut SyncSettings,
        local: &LocalSettings,
    ) -> Result<Option<Classification>, StorageError> {
        if let Some(label_id) = rule_label(sync, tab.host) {
            tracing::debug!(target: "classifier", host = tab.host, label_id = %label_id, "domain rule matched");
            return Ok(Some(Classification {
                label_id,
                ai_succeeded: false,
            }));
        }
        self.classify_remote(tab, sync, local).await
    }

    async fn classify_remote(
        &self,
        tab: TabFacts<'_>,
        sync: &mut SyncSettings,
        local: &LocalSettings,
    ) -> Result<Option<Classification>, StorageError> {
        let api_key = local.api_key();
        if api_key.is_empty() {
            tracing::debug!(target: "classifier", provider = %local.api_provider, "no api key configured; skipping");
            return Ok(None);
        }

        let provider = local.api_provider;
        let model = sync.model_for(provider).trim().to_string();
        if model.is_empty() {
            tracing::debug!(target: "classifier", %provider, "no model configured; skipping");
            return Ok(None);
        }

        let label_names = sync.label_names();
        let prompt = build_prompt(&PromptContext {
            title: tab.title,
            url: tab.url,
            host: tab.host,
            label_names: &label_names,
            allow_new_labels: sync.allow_new_labels,
            custom_prompt: &sync.custom_prompt,
        });

        let outcome = self.provider.complete(provider, &prompt, api_key, &model).await;

        if local.logging_enabled {
            let (response, error) = match &outcome {
                Ok(text) => (Some(text.clone()), None),
                Err(err) => (None, Some(err.to_string())),
            };
            let entry = ClassificationLogEntry {
                ts: Utc::now(),
                provider: provider.to_string(),
                model: model.clone(),
                title: tab.title.to_string(),
                url: tab.url.to_string(),
                host: tab.host.to_string(),
                labels: label_names,
                allow_new_labels: sync.allow_new_labels,
                custom_prompt: sync.custom_prompt.clone(),
                prompt,
                response,
                error,
            };
            if let Err(err) = self.logs.append(&entry).await {
                tracing::warn!(target: "classifier", error = %err, "log write failed");
            }
        }

        let raw = match outcome {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(target: "classifier", %provider, error = %err, "AI classification failed");
                return Ok(None);
            }
        };

        let Some(label_name) = extract_label(&raw) else {
            tracing::debug!(target: "classifier", %provider, "response held no usable label");
            return Ok(None);
        };

        if let Some(label_id) = find_id_by_name(&sync.labels, &label_name) {
            return Ok(Some(Classification {
                label_id,
                ai_succeeded: true,
            }));
        }

        if !sync.allow_new_labels {
            tracing::debug!(target: "classifier", label = %label_name, "model proposed an unknown label; new labels disabled");
            return Ok(None);
        }

        let label = create_label(&label_name, &sync.labels);
        let label_id = label.id.clone();
        tracing::info!(target: "classifier", label_id = %label_id, name = %label.name, color = %label.color, "created label");
        sync.labels.push(label);
        self.settings.save_sync(sync, &[keys::LABELS]).await?;

        Ok(Some(Classification {
            label_id,
            ai_succeeded: true,
        }))
    }
}
