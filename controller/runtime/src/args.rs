use crate::{
    catalog::{MeshCatalog, ResyncTicker},
    core::{
        messaging::{Broker, BrokerMetrics},
        workerpool::WorkerPool,
        Configurator, Probes, Provider,
    },
    health,
    index::{Cache, CacheMetrics, EnvOverrides, FederatedProvider, KubeProvider, MeshConfigurator},
    k8s::{self, GlobalTrafficPolicy, MeshConfig, Resource, ServiceImport},
    poll,
    sidecar::{MemoryStore, Server, SidecarMetrics},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::{runtime::watcher, Client};
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "ecnet-controller", about = "The ecnet service mesh control plane")]
pub struct Args {
    #[clap(
        long,
        default_value = "ecnet=info,warn",
        env = "ECNET_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "ecnet")]
    mesh_name: String,

    /// The namespace the control plane runs in. The mesh configuration is
    /// read from this namespace.
    #[clap(long, env = "ECNET_NAMESPACE", default_value = "ecnet-system")]
    ecnet_namespace: String,

    #[clap(long, default_value = "ecnet-mesh-config")]
    ecnet_config_name: String,

    #[clap(long, default_value = "cluster.local")]
    trust_domain: String,

    #[clap(long, default_value = "0.0.0.0:9091")]
    health_addr: SocketAddr,

    /// The port configuration is polled on when the mesh configuration does
    /// not set one.
    #[clap(long, default_value = "6060")]
    proxy_server_port: u16,

    /// The number of configuration workers. Zero uses one per CPU.
    #[clap(long, default_value = "0")]
    worker_pool_size: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            mesh_name,
            ecnet_namespace,
            ecnet_config_name,
            trust_domain,
            health_addr,
            proxy_server_port,
            worker_pool_size,
        } = self;

        let mut prom = <Registry>::default();
        let broker = Broker::new(BrokerMetrics::register(
            prom.sub_registry_with_prefix("broker"),
        ));
        let cache = Cache::shared(
            broker.clone(),
            CacheMetrics::register(prom.sub_registry_with_prefix("cache")),
        );
        let sidecar_metrics = SidecarMetrics::register(prom.sub_registry_with_prefix("sidecar"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        info!(%mesh_name, %trust_domain, namespace = %ecnet_namespace, "Starting control plane");

        // Spawn resource watches.

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(cache.clone(), namespaces).instrument(info_span!("namespaces")),
        );

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(cache.clone(), services).instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(cache.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(cache.clone(), pods).instrument(info_span!("pods")));

        let service_accounts = runtime.watch_all::<k8s::ServiceAccount>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(cache.clone(), service_accounts)
                .instrument(info_span!("serviceaccounts")),
        );

        if api_resource_exists::<MeshConfig>(&runtime.client()).await {
            let mesh_configs = runtime
                .watch_namespaced::<MeshConfig>(ecnet_namespace.clone(), watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(cache.clone(), mesh_configs)
                    .instrument(info_span!("meshconfigs")),
            );
        } else {
            tracing::warn!(
                "meshconfigs.config.flomesh.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<ServiceImport>(&runtime.client()).await {
            let service_imports = runtime.watch_all::<ServiceImport>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(cache.clone(), service_imports)
                    .instrument(info_span!("serviceimports")),
            );
        } else {
            tracing::warn!(
                "serviceimports.flomesh.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<GlobalTrafficPolicy>(&runtime.client()).await {
            let policies = runtime.watch_all::<GlobalTrafficPolicy>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(cache.clone(), policies)
                    .instrument(info_span!("globaltrafficpolicies")),
            );
        } else {
            tracing::warn!(
                "globaltrafficpolicies.flomesh.io resource kind not found, skipping watches"
            );
        }

        let shutdown = runtime.shutdown_handle();

        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(KubeProvider::new(cache.clone())),
            Arc::new(FederatedProvider::new(cache.clone())),
        ];
        let catalog = Arc::new(MeshCatalog::new(providers));
        let cfg: Arc<dyn Configurator> = Arc::new(MeshConfigurator::new(
            cache,
            &ecnet_namespace,
            &ecnet_config_name,
            EnvOverrides::from_env(),
        ));

        tokio::spawn(
            ResyncTicker::new(broker.clone(), cfg.clone())
                .run(shutdown.clone())
                .instrument(info_span!("resync")),
        );

        let server = Server::new(
            catalog,
            cfg.clone(),
            broker,
            WorkerPool::spawn(worker_pool_size, shutdown.clone()),
            Arc::new(MemoryStore::default()),
            sidecar_metrics,
        );
        server.start(shutdown.clone()).await?;

        let probes = vec![server.clone() as Arc<dyn Probes>];
        let listener = TcpListener::bind(health_addr).await?;
        tokio::spawn(
            health::serve(listener, probes, shutdown.clone()).instrument(info_span!("health")),
        );

        // The mesh configuration may override the poll port.
        let poll_port = match u16::try_from(cfg.proxy_server_port()) {
            Ok(port) if port != 0 => port,
            _ => proxy_server_port,
        };
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], poll_port))).await?;
        tokio::spawn(poll::serve(listener, server, shutdown).instrument(info_span!("poll")));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
