use crate::{
    compile::{compile, Compiled},
    metrics::SidecarMetrics,
    proxy::Proxy,
    publish::{Outcome, Publisher},
};
use ecnet_controller_core::{workerpool::Job, Configurator, MeshCataloger};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info_span, Instrument};

/// State shared by every configuration job.
pub(crate) struct Context {
    pub catalog: Arc<dyn MeshCataloger>,
    pub cfg: Arc<dyn Configurator>,
    pub publisher: Publisher,
    pub metrics: SidecarMetrics,
    /// Signaled when a compile could not resolve every upstream.
    pub retry: Notify,
}

/// Compiles and publishes one proxy's configuration.
pub(crate) struct ConfigJob {
    pub ctx: Arc<Context>,
    pub proxy: Arc<Proxy>,
}

#[async_trait::async_trait]
impl Job for ConfigJob {
    async fn run(self: Box<Self>) {
        let Self { ctx, proxy } = *self;
        let span = info_span!("config", %proxy);
        async move {
            ctx.metrics.job();
            let mut state = proxy.lock().await;
            let outcome = match compile(&*ctx.catalog, &*ctx.cfg) {
                Compiled::NotReady => {
                    tracing::debug!("Upstreams not yet resolvable; retrying");
                    ctx.retry.notify_one();
                    Outcome::NotReady
                }
                Compiled::Ready(conf) => ctx.publisher.publish(&mut state.etag, conf).await,
            };
            ctx.metrics.publish(outcome);
        }
        .instrument(span)
        .await
    }

    fn job_name(&self) -> String {
        format!("config{}", self.proxy)
    }
}
