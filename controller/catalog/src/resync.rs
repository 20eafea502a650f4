use ecnet_controller_core::{
    announcements::{Event, Kind, Resource},
    messaging::Broker,
    Configurator,
};
use std::{sync::Arc, time::Duration};
use tokio::time::{self, Instant};

/// The shortest period at which proxies are resynced.
pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically asks every proxy to recompute its configuration, even when
/// nothing was observed to change.
///
/// The period is the configured resync interval, clamped to a minimum. A
/// zero interval disables resyncs. The interval is re-read whenever the mesh
/// configuration changes.
pub struct ResyncTicker {
    broker: Broker,
    configurator: Arc<dyn Configurator>,
    min_interval: Duration,
}

// === impl ResyncTicker ===

impl ResyncTicker {
    pub fn new(broker: Broker, configurator: Arc<dyn Configurator>) -> Self {
        Self {
            broker,
            configurator,
            min_interval: MIN_RESYNC_INTERVAL,
        }
    }

    pub async fn run(self, shutdown: drain::Watch) {
        let mesh_config_kinds = [Event::Added, Event::Updated, Event::Deleted]
            .map(|event| Kind::Resource(Resource::MeshConfig, event));
        let mut mesh_config = self.broker.subscribe_kube_events(&mesh_config_kinds);

        let mut interval = self.interval();
        let mut deadline = interval.map(|i| Instant::now() + i);
        if let Some(interval) = interval {
            tracing::info!(?interval, "Starting resync ticker");
        }

        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);
        loop {
            let tick = async move {
                match deadline {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => futures::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                release = &mut shutdown => {
                    tracing::debug!("Resync ticker stopped");
                    drop(release);
                    break;
                }

                ev = mesh_config.recv() => {
                    if ev.is_none() {
                        tracing::debug!("Mesh config subscription closed");
                        break;
                    }
                    let updated = self.interval();
                    if updated != interval {
                        match updated {
                            Some(i) => tracing::info!(interval = ?i, "Resync interval changed"),
                            None => tracing::info!("Resync disabled"),
                        }
                        interval = updated;
                        deadline = interval.map(|i| Instant::now() + i);
                    }
                }

                () = tick => {
                    tracing::debug!("Resyncing proxies");
                    self.broker.broadcast_proxy_update();
                    deadline = interval.map(|i| Instant::now() + i);
                }
            }
        }

        self.broker.unsubscribe_kube_events(mesh_config);
    }

    fn interval(&self) -> Option<Duration> {
        let interval = self.configurator.config_resync_interval();
        if interval.is_zero() {
            return None;
        }
        Some(interval.max(self.min_interval))
    }
}
