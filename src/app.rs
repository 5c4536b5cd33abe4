use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::BufReader,
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};

use crate::{
    ai::{build_http_client, ProviderClient, ProxyTarget},
    classifier::Classifier,
    config::AppConfig,
    db::{self, classification_log::ClassificationLogRepository, settings::SettingsRepository},
    host::{HostBridge, HostContext},
    infrastructure::{directories::ResolvedPaths, shutdown::Shutdown},
    platform::{GroupMutation, MirrorBrowser},
    tasks::TabCoordinator,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TabGrouperApp {
    bridge: HostBridge,
    mutations: mpsc::UnboundedReceiver<GroupMutation>,
    settings_watcher: JoinHandle<()>,
    settings: Arc<SettingsRepository>,
    shutdown: Shutdown,
}

impl TabGrouperApp {
    pub async fn initialize(config: AppConfig, paths: ResolvedPaths, shutdown: Shutdown) -> Result<Self> {
        let pool = db::init_pool(&paths.db_path)
            .await
            .with_context(|| format!("failed to open database {}", paths.db_path.display()))?;
        let settings = Arc::new(SettingsRepository::new(pool.clone()));
        if settings.ensure_sync_defaults().await? {
            tracing::info!(target: "storage", "wrote default synced settings");
        }
        let logs = Arc::new(ClassificationLogRepository::new(
            pool,
            config.logging.classification_log_capacity,
        ));

        let local = settings.load_local().await?;
        let proxy = ProxyTarget::from_settings(&local.proxy);
        if let Some(proxy) = &proxy {
            tracing::info!(target: "provider", proxy = %proxy.url(), "restoring stored proxy");
        }
        let provider = Arc::new(ProviderClient::new(
            build_http_client(proxy.as_ref())?,
            config.providers.clone(),
        ));

        let (mutation_tx, mutations) = mpsc::unbounded_channel();
        let browser = Arc::new(MirrorBrowser::with_mutation_channel(mutation_tx));
        let classifier = Classifier::new(provider.clone(), settings.clone(), logs.clone());
        let coordinator = Arc::new(TabCoordinator::new(
            browser.clone(),
            settings.clone(),
            classifier,
            &config.grouping,
        ));
        let settings_watcher = coordinator.spawn_settings_watcher(shutdown.subscribe());

        let bridge = HostBridge::new(HostContext {
            browser,
            coordinator,
            settings: settings.clone(),
            logs,
            provider,
        });

        Ok(Self {
            bridge,
            mutations,
            settings_watcher,
            settings,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let TabGrouperApp {
            bridge,
            mutations,
            mut settings_watcher,
            settings,
            shutdown,
        } = self;

        tracing::info!(version = env!("CARGO_PKG_VERSION"), "tab grouper started");

        let mut shutdown_listener = shutdown.subscribe();
        let mut host = Box::pin(bridge.run(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            mutations,
            shutdown.subscribe(),
        ));
        let mut host_result = None;

        tokio::select! {
            _ = shutdown_listener.notified() => {
                tracing::info!("shutdown requested");
            }
            res = &mut host => {
                host_result = Some(res);
            }
        }

        shutdown.trigger();

        let host_result = match host_result {
            Some(res) => res,
            None => match timeout(SHUTDOWN_TIMEOUT, &mut host).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::warn!(target: "host", "host bridge did not stop within {:?}", SHUTDOWN_TIMEOUT);
                    Ok(())
                }
            },
        };
        if let Err(err) = &host_result {
            tracing::error!(target: "host", error = %format!("{err:#}"), "host bridge failed");
        }

        if timeout(SHUTDOWN_TIMEOUT, &mut settings_watcher).await.is_err() {
            tracing::warn!(target: "coordinator", "settings watcher did not stop within {:?}; aborting", SHUTDOWN_TIMEOUT);
            settings_watcher.abort();
        }

        if timeout(SHUTDOWN_TIMEOUT, settings.close()).await.is_err() {
            tracing::warn!(target: "storage", "database did not close within {:?}", SHUTDOWN_TIMEOUT);
        }

        tracing::info!("tab grouper stopped");
        host_result
    }
}
