//! Drives configuration jobs for connected proxies.
//!
//! Broadcast proxy updates are debounced: a burst of mesh changes results in
//! a single job per proxy once the burst settles. Updates targeted at one
//! proxy bypass the debounce.

use crate::{
    conf::PipyConf,
    job::{ConfigJob, Context},
    metrics::SidecarMetrics,
    proxy::{Proxy, ProxyRegistry},
    publish::{to_pretty_json, Publisher},
    store::{Batch, BatchItem, Codebases, ConfigStore, CONFIG_FILE},
};
use anyhow::{bail, Result};
use ecnet_controller_core::{
    announcements::Announcement,
    messaging::{proxy_uuid_topic, Broker, Subscription, PROXY_UPDATE_TOPIC},
    workerpool::WorkerPool,
    Configurator, MeshCataloger, Probes,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{self, Instant};
use tracing::{info_span, Instrument};

/// How long the first reconciliation waits for the mesh state to settle.
const INITIAL_DELAY: Duration = Duration::from_secs(20);
const EVENT_DELAY: Duration = Duration::from_secs(5);
/// A reconciliation triggered by events is repeated once after this delay.
const CONFIRM_DELAY: Duration = Duration::from_secs(10);
/// Once confirmed, every proxy is recompiled on this period even without
/// events, so changes no announcement covered are still picked up.
const IDLE_DELAY: Duration = Duration::from_secs(20);

const STORE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const STORE_POLL_TIMEOUT: Duration = Duration::from_secs(90);

pub struct Server {
    ctx: Arc<Context>,
    store: Arc<dyn ConfigStore>,
    broker: Broker,
    pool: WorkerPool,
    registry: ProxyRegistry,
    ready: AtomicBool,
}

// === impl Server ===

impl Server {
    pub fn new(
        catalog: Arc<dyn MeshCataloger>,
        cfg: Arc<dyn Configurator>,
        broker: Broker,
        pool: WorkerPool,
        store: Arc<dyn ConfigStore>,
        metrics: SidecarMetrics,
    ) -> Arc<Self> {
        let codebases = Codebases::new(&cfg.repo_server_codebase());
        let publisher = Publisher::new(store.clone(), codebases);
        Arc::new(Self {
            ctx: Arc::new(Context {
                catalog,
                cfg,
                publisher,
                metrics,
                retry: Default::default(),
            }),
            store,
            broker,
            pool,
            registry: ProxyRegistry::default(),
            ready: AtomicBool::new(false),
        })
    }

    /// Waits for the configuration store, seeds the base codebase, and starts
    /// reconciling proxies in the background.
    pub async fn start(self: &Arc<Self>, shutdown: drain::Watch) -> Result<()> {
        let store = &*self.store;
        poll_store("configuration store", move || store.is_up()).await?;

        let codebases = self.ctx.publisher.codebases();
        let batch = Batch {
            basepath: codebases.base().to_string(),
            items: vec![BatchItem {
                filename: CONFIG_FILE.to_string(),
                content: to_pretty_json(&PipyConf::default())?,
            }],
        };
        if !store.batch("0", vec![batch]).await? {
            bail!("configuration store refused the base codebase");
        }

        let base = codebases.base();
        poll_store("base codebase", move || async move {
            Ok::<_, anyhow::Error>(store.get_codebase(base).await?.is_some())
        })
        .await?;

        // Subscribe before returning so that no broadcast is missed.
        let updates = self.broker.subscribe_proxy_updates([PROXY_UPDATE_TOPIC]);
        tokio::spawn(
            self.clone()
                .debounce(updates, shutdown)
                .instrument(info_span!("debounce")),
        );
        self.ready.store(true, Ordering::Release);
        tracing::info!(base = %codebases.base(), "Sidecar configuration server started");
        Ok(())
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &SidecarMetrics {
        &self.ctx.metrics
    }

    /// The most recently published configuration, as served to sidecars.
    pub async fn latest_json(&self) -> Result<String> {
        self.ctx.publisher.latest_json().await
    }

    async fn debounce(
        self: Arc<Self>,
        mut updates: Subscription<Announcement>,
        shutdown: drain::Watch,
    ) {
        let mut reconfirm = true;
        let timer = time::sleep(INITIAL_DELAY);
        tokio::pin!(timer);

        let signaled = shutdown.clone().signaled();
        tokio::pin!(signaled);
        loop {
            tokio::select! {
                biased;

                release = &mut signaled => {
                    tracing::debug!("Debounce loop stopped");
                    drop(release);
                    break;
                }

                ev = updates.recv() => {
                    if ev.is_none() {
                        tracing::debug!("Proxy update subscription closed");
                        break;
                    }
                    reconfirm = true;
                    timer.as_mut().reset(Instant::now() + EVENT_DELAY);
                }

                () = self.ctx.retry.notified() => {
                    timer.as_mut().reset(Instant::now() + EVENT_DELAY);
                }

                () = &mut timer => {
                    self.ctx.metrics.debounce_fired();
                    self.reconcile(&shutdown).await;
                    // The timer is always re-armed; an idle loop keeps
                    // resyncing every proxy at IDLE_DELAY.
                    let delay = if reconfirm {
                        reconfirm = false;
                        CONFIRM_DELAY
                    } else {
                        IDLE_DELAY
                    };
                    timer.as_mut().reset(Instant::now() + delay);
                }
            }
        }

        self.broker.unsubscribe_proxy_updates(updates);
    }

    /// Runs one job per connected proxy, waiting for each to finish.
    async fn reconcile(self: &Arc<Self>, shutdown: &drain::Watch) {
        let mut proxies = self.registry.connected();
        if proxies.is_empty() {
            let proxy = Arc::new(Proxy::new());
            self.registry.register(proxy.clone());
            tokio::spawn(
                self.clone()
                    .inform(proxy.clone(), shutdown.clone())
                    .instrument(info_span!("inform", %proxy)),
            );
            proxies.push(proxy);
        }

        tracing::debug!(proxies = proxies.len(), "Reconciling proxies");
        for proxy in proxies {
            if self.run_job(proxy).await.is_err() {
                tracing::debug!("Worker pool shut down");
                return;
            }
        }
    }

    /// Handles updates targeted at a single proxy until it quits.
    async fn inform(self: Arc<Self>, proxy: Arc<Proxy>, shutdown: drain::Watch) {
        let mut updates = self
            .broker
            .subscribe_proxy_updates([proxy_uuid_topic(&proxy.uuid().to_string())]);
        let mut quit = proxy.quit_rx();

        let signaled = shutdown.signaled();
        tokio::pin!(signaled);
        while !proxy.has_quit() {
            tokio::select! {
                biased;

                release = &mut signaled => {
                    drop(release);
                    break;
                }

                res = quit.changed() => {
                    if res.is_err() {
                        break;
                    }
                }

                ev = updates.recv() => {
                    if ev.is_none() || self.run_job(proxy.clone()).await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Proxy update loop stopped");
        self.broker.unsubscribe_proxy_updates(updates);
    }

    async fn run_job(&self, proxy: Arc<Proxy>) -> Result<()> {
        let job = ConfigJob {
            ctx: self.ctx.clone(),
            proxy,
        };
        self.pool.add_job(Box::new(job)).await?;
        Ok(())
    }
}

impl Probes for Server {
    fn liveness(&self) -> bool {
        true
    }

    fn readiness(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn id(&self) -> String {
        "sidecar-server".to_string()
    }
}

/// Polls `check` until it reports true, failing after a timeout.
async fn poll_store<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + STORE_POLL_TIMEOUT;
    loop {
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => tracing::debug!("Waiting for {what}"),
            Err(error) => tracing::debug!(%error, "Waiting for {what}"),
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        time::sleep(STORE_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests;
