use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{query, query_as, sqlite::SqlitePool};
use tokio::sync::broadcast;

use crate::domain::{
    DomainRules, Label, LabelColor, LocalSettings, ProviderKind, ProxySettings, SyncSettings,
    CUSTOM_PROMPT_MAX,
};

use super::StorageError;

/// Storage keys, shared with the extension side.
pub mod keys {
    pub const LABELS: &str = "labels";
    pub const DEFAULT_LABEL_ID: &str = "defaultLabelId";
    pub const ALLOW_NEW_LABELS: &str = "allowNewLabels";
    pub const AUTO_GROUP: &str = "autoGroup";
    pub const DOMAIN_RULES_ENABLED: &str = "domainRulesEnabled";
    pub const DOMAIN_RULES: &str = "domainRules";
    pub const MODEL_OPENAI: &str = "modelOpenAI";
    pub const MODEL_GEMINI: &str = "modelGemini";
    pub const MODEL_DEEPSEEK: &str = "modelDeepSeek";
    pub const MODEL_ZHIPU: &str = "modelZhipu";
    pub const MODEL_OPENROUTER: &str = "modelOpenRouter";
    pub const CUSTOM_PROMPT: &str = "customPrompt";

    pub const API_PROVIDER: &str = "apiProvider";
    pub const API_KEY_LEGACY: &str = "apiKey";
    pub const LOGGING_ENABLED: &str = "loggingEnabled";
    pub const PROXY_ENABLED: &str = "proxyEnabled";
    pub const PROXY_HOST: &str = "proxyHost";
    pub const PROXY_PORT: &str = "proxyPort";
    pub const PROXY_SCHEME: &str = "proxyScheme";
    pub const LAST_SYNC_UPDATE_AT: &str = "lastSyncUpdateAt";

    /// Synced keys whose change invalidates the current grouping.
    pub const REGROUP_TRIGGERS: [&str; 4] = [LABELS, DOMAIN_RULES, DEFAULT_LABEL_ID, DOMAIN_RULES_ENABLED];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Sync,
    Local,
}

impl StorageArea {
    fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Sync => "sync",
            StorageArea::Local => "local",
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys written by one `set` call together with their new values.
#[derive(Debug, Clone)]
pub struct StorageChange {
    pub area: StorageArea,
    pub changes: Map<String, Value>,
}

impl StorageChange {
    pub fn touches_any(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.changes.contains_key(*k))
    }
}

pub fn api_key_storage_key(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAi => "apiKeyOpenAI",
        ProviderKind::Gemini => "apiKeyGemini",
        ProviderKind::DeepSeek => "apiKeyDeepSeek",
        ProviderKind::Zhipu => "apiKeyZhipu",
        ProviderKind::OpenRouter => "apiKeyOpenRouter",
    }
}

#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
    changes: broadcast::Sender<StorageChange>,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { pool, changes }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    /// Returns stored values for `keys`, or every key in the area when `keys`
    /// is empty. Keys that were never written are simply absent.
    pub async fn get(&self, area: StorageArea, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let rows: Vec<(String, String)> = query_as(r#"SELECT key, value FROM settings WHERE area = ?1"#)
            .bind(area.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut values = Map::new();
        for (key, raw) in rows {
            if !keys.is_empty() && !keys.contains(&key.as_str()) {
                continue;
            }
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(err) => {
                    tracing::warn!(target: "storage", %area, key = %key, error = %err, "ignoring corrupt setting");
                }
            }
        }
        Ok(values)
    }

    /// Writes `patch` and announces the keys whose value actually changed.
    /// A patch that changes nothing is not written.
    pub async fn set(&self, area: StorageArea, patch: Map<String, Value>) -> Result<(), StorageError> {
        let names: Vec<&str> = patch.keys().map(String::as_str).collect();
        let current = self.get(area, &names).await?;
        let patch: Map<String, Value> = patch
            .into_iter()
            .filter(|(key, value)| current.get(key) != Some(value))
            .collect();
        if patch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in &patch {
            query(
                r#"INSERT INTO settings (area, key, value) VALUES (?1, ?2, ?3)
                   ON CONFLICT(area, key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP"#,
            )
            .bind(area.as_str())
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(target: "storage", %area, keys = ?patch.keys().collect::<Vec<_>>(), "settings written");
        let _ = self.changes.send(StorageChange {
            area,
            changes: patch,
        });
        Ok(())
    }

    pub async fn load_sync(&self) -> Result<SyncSettings, StorageError> {
        let stored = self.get(StorageArea::Sync, &[]).await?;
        Ok(decode_sync(&stored))
    }

    pub async fn load_local(&self) -> Result<LocalSettings, StorageError> {
        let stored = self.get(StorageArea::Local, &[]).await?;
        Ok(decode_local(&stored))
    }

    /// Writes the given synced fields from `sync`. Labels are left alone when
    /// the stored list could not be read, since `sync` then holds defaults.
    pub async fn save_sync(&self, sync: &SyncSettings, fields: &[&str]) -> Result<(), StorageError> {
        let mut patch = Map::new();
        for field in fields {
            if let Some(value) = encode_sync_field(sync, field)? {
                patch.insert((*field).to_string(), value);
            }
        }
        if patch.contains_key(keys::LABELS) {
            let stored = self.get(StorageArea::Sync, &[keys::LABELS]).await?;
            if labels_unreadable(&stored) {
                tracing::warn!(target: "storage", "stored labels are unreadable; not overwriting them");
                patch.remove(keys::LABELS);
            }
        }
        self.set(StorageArea::Sync, patch).await
    }

    /// Fills in defaults for synced keys that are missing or hold a value of
    /// the wrong shape. Returns whether anything was written.
    pub async fn ensure_sync_defaults(&self) -> Result<bool, StorageError> {
        let stored = self.get(StorageArea::Sync, &[]).await?;
        let defaults = SyncSettings::default();
        let mut missing = Vec::new();

        if stored
            .get(keys::LABELS)
            .and_then(Value::as_array)
            .map_or(true, |labels| labels.is_empty())
        {
            missing.push(keys::LABELS);
        }
        if decode::<String>(&stored, keys::DEFAULT_LABEL_ID).map_or(true, |s| s.is_empty()) {
            missing.push(keys::DEFAULT_LABEL_ID);
        }
        for key in [keys::ALLOW_NEW_LABELS, keys::AUTO_GROUP, keys::DOMAIN_RULES_ENABLED] {
            if decode::<bool>(&stored, key).is_none() {
                missing.push(key);
            }
        }
        if decode::<DomainRules>(&stored, keys::DOMAIN_RULES).is_none() {
            missing.push(keys::DOMAIN_RULES);
        }
        for key in [keys::MODEL_OPENAI, keys::MODEL_GEMINI] {
            if decode::<String>(&stored, key).map_or(true, |s| s.is_empty()) {
                missing.push(key);
            }
        }
        for key in [keys::MODEL_DEEPSEEK, keys::MODEL_ZHIPU, keys::MODEL_OPENROUTER, keys::CUSTOM_PROMPT] {
            if decode::<String>(&stored, key).is_none() {
                missing.push(key);
            }
        }

        if missing.is_empty() {
            return Ok(false);
        }
        tracing::info!(target: "storage", keys = ?missing, "writing default sync settings");
        self.save_sync(&defaults, &missing).await?;
        Ok(true)
    }
}

fn decode<T: DeserializeOwned>(stored: &Map<String, Value>, key: &str) -> Option<T> {
    stored
        .get(key)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn decode_non_empty(stored: &Map<String, Value>, key: &str) -> Option<String> {
    decode::<String>(stored, key).filter(|s| !s.is_empty())
}

/// Reads the stored label list entry by entry. Entries without an id are
/// dropped; an unknown color is read as grey.
fn decode_labels(stored: &Map<String, Value>) -> Option<Vec<Label>> {
    let entries = stored.get(keys::LABELS)?.as_array()?;
    Some(entries.iter().filter_map(decode_label).collect())
}

fn decode_label(entry: &Value) -> Option<Label> {
    let Some(id) = entry
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        tracing::warn!(target: "storage", %entry, "skipping stored label without an id");
        return None;
    };
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(id);
    let color = match entry.get("color").cloned().map(serde_json::from_value::<LabelColor>) {
        Some(Ok(color)) => color,
        _ => {
            tracing::warn!(target: "storage", label_id = id, color = ?entry.get("color"), "unknown label color; using grey");
            LabelColor::Grey
        }
    };
    Some(Label::new(id, name, color))
}

/// True when a non-empty label list is stored but none of it can be used.
fn labels_unreadable(stored: &Map<String, Value>) -> bool {
    let stored_any = stored
        .get(keys::LABELS)
        .and_then(Value::as_array)
        .is_some_and(|entries| !entries.is_empty());
    stored_any && decode_labels(stored).map_or(true, |labels| labels.is_empty())
}

fn decode_sync(stored: &Map<String, Value>) -> SyncSettings {
    let defaults = SyncSettings::default();
    let custom_prompt: String = decode::<String>(stored, keys::CUSTOM_PROMPT)
        .unwrap_or_default()
        .chars()
        .take(CUSTOM_PROMPT_MAX)
        .collect();

    SyncSettings {
        labels: decode_labels(stored)
            .filter(|labels| !labels.is_empty())
            .unwrap_or(defaults.labels),
        default_label_id: decode_non_empty(stored, keys::DEFAULT_LABEL_ID)
            .unwrap_or(defaults.default_label_id),
        allow_new_labels: decode(stored, keys::ALLOW_NEW_LABELS).unwrap_or(defaults.allow_new_labels),
        auto_group: decode(stored, keys::AUTO_GROUP).unwrap_or(defaults.auto_group),
        domain_rules_enabled: decode(stored, keys::DOMAIN_RULES_ENABLED)
            .unwrap_or(defaults.domain_rules_enabled),
        domain_rules: decode(stored, keys::DOMAIN_RULES).unwrap_or_default(),
        model_openai: decode_non_empty(stored, keys::MODEL_OPENAI).unwrap_or(defaults.model_openai),
        model_gemini: decode_non_empty(stored, keys::MODEL_GEMINI).unwrap_or(defaults.model_gemini),
        model_deepseek: decode(stored, keys::MODEL_DEEPSEEK).unwrap_or(defaults.model_deepseek),
        model_zhipu: decode(stored, keys::MODEL_ZHIPU).unwrap_or(defaults.model_zhipu),
        model_openrouter: decode(stored, keys::MODEL_OPENROUTER).unwrap_or(defaults.model_openrouter),
        custom_prompt,
    }
}

fn encode_sync_field(sync: &SyncSettings, field: &str) -> Result<Option<Value>, serde_json::Error> {
    let value = match field {
        keys::LABELS => serde_json::to_value(&sync.labels)?,
        keys::DEFAULT_LABEL_ID => Value::from(sync.default_label_id.clone()),
        keys::ALLOW_NEW_LABELS => Value::from(sync.allow_new_labels),
        keys::AUTO_GROUP => Value::from(sync.auto_group),
        keys::DOMAIN_RULES_ENABLED => Value::from(sync.domain_rules_enabled),
        keys::DOMAIN_RULES => serde_json::to_value(&sync.domain_rules)?,
        keys::MODEL_OPENAI => Value::from(sync.model_openai.clone()),
        keys::MODEL_GEMINI => Value::from(sync.model_gemini.clone()),
        keys::MODEL_DEEPSEEK => Value::from(sync.model_deepseek.clone()),
        keys::MODEL_ZHIPU => Value::from(sync.model_zhipu.clone()),
        keys::MODEL_OPENROUTER => Value::from(sync.model_openrouter.clone()),
        keys::CUSTOM_PROMPT => Value::from(sync.custom_prompt.clone()),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn decode_local(stored: &Map<String, Value>) -> LocalSettings {
    let defaults = LocalSettings::default();
    let api_provider = decode::<String>(stored, keys::API_PROVIDER)
        .map(|id| ProviderKind::from_id(&id))
        .unwrap_or(defaults.api_provider);

    let api_keys = ProviderKind::ALL
        .iter()
        .filter_map(|kind| decode_non_empty(stored, api_key_storage_key(*kind)).map(|key| (*kind, key)))
        .collect();

    // Older option pages stored the port as a number.
    let proxy_port = match stored.get(keys::PROXY_PORT) {
        Some(Value::String(port)) => port.clone(),
        Some(Value::Number(port)) => port.to_string(),
        _ => String::new(),
    };

    LocalSettings {
        api_provider,
        api_keys,
        legacy_api_key: decode(stored, keys::API_KEY_LEGACY).unwrap_or_default(),
        logging_enabled: decode(stored, keys::LOGGING_ENABLED).unwrap_or(defaults.logging_enabled),
        proxy: ProxySettings {
            enabled: decode(stored, keys::PROXY_ENABLED).unwrap_or(false),
            host: decode(stored, keys::PROXY_HOST).unwrap_or_default(),
            port: proxy_port,
            scheme: decode_non_empty(stored, keys::PROXY_SCHEME).unwrap_or_else(|| "http".to_string()),
        },
    }
}
