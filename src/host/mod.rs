pub mod protocol;

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Map, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::timeout,
};

use crate::{
    ai::{build_http_client, ProviderClient, ProxyTarget},
    db::{
        classification_log::ClassificationLogRepository,
        settings::{api_key_storage_key, keys, SettingsRepository, StorageArea},
    },
    domain::{SyncSettings, TabStatus},
    infrastructure::shutdown::ShutdownListener,
    labels::{
        clear_rules, delete_label, delete_rule, index_by_id, move_label, recolor_label,
        rename_label, sort_labels_by_name, upsert_rule,
    },
    platform::{GroupMutation, MirrorBrowser},
    tasks::{
        maintenance::{dedupe_tabs, ungroup_tabs},
        TabCoordinator,
    },
};

use protocol::{error_response, ok_response, parse_line, HostMessage, Notification};

const TASK_GRACE: Duration = Duration::from_secs(5);

/// Everything a host message may touch.
pub struct HostContext {
    pub browser: Arc<MirrorBrowser>,
    pub coordinator: Arc<TabCoordinator>,
    pub settings: Arc<SettingsRepository>,
    pub logs: Arc<ClassificationLogRepository>,
    pub provider: Arc<ProviderClient>,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl HostContext {
    /// Loads synced settings, applies `edit`, and writes back `fields`.
    async fn edit_sync<T>(
        &self,
        fields: &[&str],
        edit: impl FnOnce(&mut SyncSettings) -> Result<T>,
    ) -> Result<T> {
        let mut sync = self.settings.load_sync().await?;
        let result = edit(&mut sync)?;
        self.settings.save_sync(&sync, fields).await?;
        Ok(result)
    }

    async fn apply_proxy(&self, target: Option<ProxyTarget>) -> Result<()> {
        let client = build_http_client(target.as_ref())?;
        self.provider.replace_http(client);

        let patch = match &target {
            Some(target) => json!({
                (keys::PROXY_ENABLED): true,
                (keys::PROXY_HOST): target.host,
                (keys::PROXY_PORT): target.port.to_string(),
                (keys::PROXY_SCHEME): target.scheme.as_str(),
            }),
            None => json!({ (keys::PROXY_ENABLED): false }),
        };
        self.settings.set(StorageArea::Local, object(patch)).await?;
        match target {
            Some(target) => tracing::info!(target: "host", proxy = %target.url(), "proxy applied"),
            None => tracing::info!(target: "host", "proxy cleared"),
        }
        Ok(())
    }

    /// Answers one command. Tab processing is handed to `tasks` and
    /// acknowledged right away.
    async fn handle(&self, message: HostMessage, tasks: &mut JoinSet<()>) -> Result<Map<String, Value>> {
        let fields = match message {
            HostMessage::TabUpdated { tab, status } => {
                // Only the navigation finishing counts; title or favicon
                // updates on a loaded tab arrive without a status.
                let complete = status == Some(TabStatus::Complete);
                self.browser.upsert_tab(tab.clone());
                if complete {
                    let coordinator = Arc::clone(&self.coordinator);
                    tasks.spawn(async move {
                        match coordinator.process_tab(&tab, false).await {
                            Ok(outcome) => {
                                tracing::debug!(target: "host", tab_id = tab.id, ?outcome, "tab processed")
                            }
                            Err(err) => {
                                tracing::error!(target: "host", tab_id = tab.id, error = %err, "tab processing failed")
                            }
                        }
                    });
                }
                Map::new()
            }
            HostMessage::TabRemoved { tab_id } => {
                self.browser.close_tab(tab_id);
                self.coordinator.forget_tab(tab_id);
                Map::new()
            }
            HostMessage::GroupUpdated { group } => {
                self.browser.upsert_group(group);
                Map::new()
            }
            HostMessage::GroupRemoved { group_id } => {
                self.browser.remove_group(group_id);
                Map::new()
            }
            message @ (HostMessage::RegroupWindow { .. } | HostMessage::ListModels { .. }) => {
                self.query(message).await?
            }
            HostMessage::ApplyProxy(request) => {
                let target = ProxyTarget::from_request(&request)?;
                self.apply_proxy(Some(target)).await?;
                Map::new()
            }
            HostMessage::ClearProxy => {
                self.apply_proxy(None).await?;
                Map::new()
            }
            HostMessage::SetSettings { area, patch } => {
                self.settings.set(area, patch).await?;
                Map::new()
            }
            HostMessage::DeleteLabel { label_id } => {
                let removed = self
                    .edit_sync(
                        &[keys::LABELS, keys::DEFAULT_LABEL_ID, keys::DOMAIN_RULES],
                        |sync| Ok(delete_label(sync, &label_id)?),
                    )
                    .await?;
                object(json!({ "deleted": removed }))
            }
            HostMessage::RenameLabel { label_id, name } => {
                let renamed = self
                    .edit_sync(&[keys::LABELS], |sync| Ok(rename_label(&mut sync.labels, &label_id, &name)?))
                    .await?;
                object(json!({ "renamed": renamed }))
            }
            HostMessage::RecolorLabel { label_id, color } => {
                self.edit_sync(&[keys::LABELS], |sync| Ok(recolor_label(&mut sync.labels, &label_id, color)?))
                    .await?;
                Map::new()
            }
            HostMessage::SortLabels { direction } => {
                self.edit_sync(&[keys::LABELS], |sync| {
                    sort_labels_by_name(&mut sync.labels, direction);
                    Ok(())
                })
                .await?;
                Map::new()
            }
            HostMessage::MoveLabel { from, to } => {
                self.edit_sync(&[keys::LABELS], |sync| Ok(move_label(&mut sync.labels, &from, &to)?))
                    .await?;
                Map::new()
            }
            HostMessage::UpsertRule { domain, label_id } => {
                let key = self
                    .edit_sync(&[keys::DOMAIN_RULES], |sync| {
                        if !index_by_id(&sync.labels).contains_key(label_id.as_str()) {
                            bail!("label {label_id} does not exist");
                        }
                        upsert_rule(&mut sync.domain_rules, &domain, &label_id)
                            .ok_or_else(|| anyhow!("domain is empty"))
                    })
                    .await?;
                object(json!({ "domain": key }))
            }
            HostMessage::DeleteRule { domain } => {
                let removed = self
                    .edit_sync(&[keys::DOMAIN_RULES], |sync| Ok(delete_rule(&mut sync.domain_rules, &domain)))
                    .await?;
                object(json!({ "removed": removed }))
            }
            HostMessage::ClearRules => {
                let removed = self
                    .edit_sync(&[keys::DOMAIN_RULES], |sync| Ok(clear_rules(&mut sync.domain_rules)))
                    .await?;
                object(json!({ "removed": removed }))
            }
            HostMessage::Ungroup { window_id } => {
                let count = ungroup_tabs(self.browser.as_ref(), window_id).await?;
                object(json!({ "count": count }))
            }
            HostMessage::Dedupe { window_id } => {
                let count = dedupe_tabs(self.browser.as_ref(), window_id).await?;
                object(json!({ "count": count }))
            }
            HostMessage::ReadLogs => {
                let logs = self.logs.read().await?;
                object(json!({ "logs": logs }))
            }
            HostMessage::ClearLogs => {
                let removed = self.logs.clear().await?;
                object(json!({ "removed": removed }))
            }
        };
        Ok(fields)
    }

    /// Commands that wait on a remote provider.
    async fn query(&self, message: HostMessage) -> Result<Map<String, Value>> {
        let fields = match message {
            HostMessage::RegroupWindow { window_id } => {
                let grouped = self.coordinator.regroup_window(window_id).await?;
                object(json!({ "grouped": grouped }))
            }
            HostMessage::ListModels { provider, api_key } => {
                let local = self.settings.load_local().await?;
                let provider = provider.unwrap_or(local.api_provider);
                let supplied = api_key
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty());
                let key = supplied
                    .clone()
                    .unwrap_or_else(|| local.key_for(provider).to_string());
                if key.is_empty() {
                    bail!("API key missing for {provider}");
                }

                let models = self.provider.list_models(provider, &key).await?;
                if let Some(key) = supplied.filter(|_| !models.is_empty()) {
                    let patch = json!({ (api_key_storage_key(provider)): key });
                    self.settings.set(StorageArea::Local, object(patch)).await?;
                }
                object(json!({ "provider": provider, "models": models }))
            }
            other => bail!("{} does not call a provider", other.kind()),
        };
        Ok(fields)
    }
}

fn reply(id: Option<Value>, kind: &'static str, result: Result<Map<String, Value>>) -> Value {
    match result {
        Ok(fields) => ok_response(id, fields),
        Err(err) => {
            tracing::warn!(target: "host", kind, error = %format!("{err:#}"), "command failed");
            error_response(id, format!("{err:#}"))
        }
    }
}

/// Line-delimited JSON bridge between the extension and the engine.
pub struct HostBridge {
    context: Arc<HostContext>,
}

impl HostBridge {
    pub fn new(context: HostContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    /// Serves requests from `input` until EOF or shutdown. Responses and
    /// group mutations are written to `output`, one JSON document per line.
    pub async fn run<R, W>(
        self,
        input: R,
        output: W,
        mutations: mpsc::UnboundedReceiver<GroupMutation>,
        mut shutdown: ShutdownListener,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let writer = spawn_writer(output, out_rx, mutations);
        let mut lines = input.lines();
        let mut tasks = JoinSet::new();

        loop {
            if shutdown.is_triggered() {
                break;
            }
            let line = tokio::select! {
                line = lines.next_line() => line.context("failed to read host input")?,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
                _ = shutdown.notified() => break,
            };
            let Some(line) = line else {
                tracing::info!(target: "host", "input closed");
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (id, message) = parse_line(line);
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(target: "host", error = %err, "malformed message");
                    let _ = out_tx.send(error_response(id, format!("malformed message: {err}")));
                    continue;
                }
            };
            let kind = message.kind();
            tracing::debug!(target: "host", kind, "message received");

            if message.calls_provider() {
                let context = Arc::clone(&self.context);
                let out_tx = out_tx.clone();
                tasks.spawn(async move {
                    let result = context.query(message).await;
                    let _ = out_tx.send(reply(id, kind, result));
                });
                continue;
            }
            let result = self.context.handle(message, &mut tasks).await;
            let _ = out_tx.send(reply(id, kind, result));
        }

        if timeout(TASK_GRACE, async { while tasks.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            tracing::warn!(target: "host", "pending tasks did not finish within {:?}; aborting", TASK_GRACE);
            tasks.shutdown().await;
        }

        drop(out_tx);
        writer.await.context("host writer panicked")??;
        Ok(())
    }
}

fn spawn_writer<W>(
    mut output: W,
    mut responses: mpsc::UnboundedReceiver<Value>,
    mut mutations: mpsc::UnboundedReceiver<GroupMutation>,
) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                biased;
                Some(mutation) = mutations.recv() => notification_line(mutation),
                response = responses.recv() => match response {
                    Some(response) => response,
                    None => break,
                },
            };
            write_line(&mut output, &line).await?;
        }
        while let Ok(mutation) = mutations.try_recv() {
            write_line(&mut output, &notification_line(mutation)).await?;
        }
        output.shutdown().await?;
        Ok(())
    })
}

fn notification_line(mutation: GroupMutation) -> Value {
    serde_json::to_value(Notification::GroupMutation { mutation }).unwrap_or(Value::Null)
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &Value) -> Result<()> {
    let mut bytes = serde_json::to_vec(line)?;
    bytes.push(b'\n');
    output.write_all(&bytes).await?;
    output.flush().await?;
    Ok(())
}
