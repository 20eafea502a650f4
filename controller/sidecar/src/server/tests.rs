use super::*;
use crate::{
    publish::Outcome,
    store::MemoryStore,
    test_util::{ep, svc, FakeCatalog, FakeConfigurator},
};
use tracing::Level;

struct Harness {
    server: Arc<Server>,
    store: Arc<MemoryStore>,
    broker: Broker,
    signal: drain::Signal,
}

impl Harness {
    async fn start(catalog: Arc<FakeCatalog>) -> Self {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();

        let (signal, shutdown) = drain::channel();
        let broker = Broker::default();
        let store = Arc::new(MemoryStore::default());
        let server = Server::new(
            catalog,
            Arc::new(FakeConfigurator::default()),
            broker.clone(),
            WorkerPool::spawn(2, shutdown.clone()),
            store.clone(),
            SidecarMetrics::default(),
        );
        server.start(shutdown).await.expect("server must start");
        Self {
            server,
            store,
            broker,
            signal,
        }
    }

    fn jobs(&self) -> u64 {
        self.server.metrics().jobs_run()
    }
}

fn ready_catalog() -> Arc<FakeCatalog> {
    Arc::new(
        FakeCatalog::default()
            .with_service(svc("web", 80, 8080, "http"))
            .with_endpoints("ns/web|8080", vec![ep("10.0.0.1")]),
    )
}

#[tokio::test(start_paused = true)]
async fn start_seeds_base_codebase() {
    let h = Harness::start(ready_catalog()).await;
    assert!(h.server.readiness());
    assert!(h.server.liveness());
    assert_eq!(h.store.batches(), 1);
    assert!(h.store.file("ecnet/base", CONFIG_FILE).is_some());
    assert_eq!(h.server.latest_json().await.expect("must serialize"), "{}");
}

#[tokio::test(start_paused = true)]
async fn start_times_out_without_store() {
    let (_signal, shutdown) = drain::channel();
    let store = Arc::new(MemoryStore::default());
    store.set_down(true);
    let server = Server::new(
        ready_catalog(),
        Arc::new(FakeConfigurator::default()),
        Broker::default(),
        WorkerPool::spawn(1, shutdown.clone()),
        store.clone(),
        SidecarMetrics::default(),
    );

    let started = Instant::now();
    assert!(server.start(shutdown).await.is_err());
    assert!(started.elapsed() >= STORE_POLL_TIMEOUT);
    assert!(!server.readiness());
    assert_eq!(store.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn broadcasts_are_debounced() {
    let h = Harness::start(ready_catalog()).await;

    for _ in 0..10 {
        h.broker.broadcast_proxy_update();
    }
    time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.jobs(), 1);
    assert_eq!(h.server.registry().connected().len(), 1);
    assert_eq!(h.server.metrics().publishes(Outcome::Published), 1);
    assert_eq!(h.store.batches(), 2);

    // The burst is confirmed once more without republishing.
    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.jobs(), 2);
    assert_eq!(h.server.metrics().publishes(Outcome::Unchanged), 1);
    assert_eq!(h.store.batches(), 2);

    let latest: serde_json::Value =
        serde_json::from_str(&h.server.latest_json().await.expect("must serialize"))
            .expect("latest must be json");
    assert_eq!(latest["Spec"]["SidecarLogLevel"], "debug");
}

#[tokio::test(start_paused = true)]
async fn idle_loop_resyncs_periodically() {
    let h = Harness::start(ready_catalog()).await;
    time::sleep(INITIAL_DELAY + Duration::from_secs(1)).await;
    assert_eq!(h.jobs(), 1);

    // The initial run is confirmed once.
    time::sleep(CONFIRM_DELAY).await;
    assert_eq!(h.jobs(), 2);

    // Without any events, each idle period triggers another run that
    // republishes nothing.
    for n in 3..6 {
        time::sleep(IDLE_DELAY).await;
        assert_eq!(h.jobs(), n);
    }
    assert_eq!(h.server.metrics().publishes(Outcome::Published), 1);
    assert_eq!(h.store.batches(), 2);
}

#[tokio::test(start_paused = true)]
async fn unready_compiles_publish_nothing_and_retry() {
    let catalog = Arc::new(FakeCatalog::default().with_service(svc("web", 80, 8080, "http")));
    let h = Harness::start(catalog.clone()).await;

    time::sleep(INITIAL_DELAY + Duration::from_secs(1)).await;
    assert_eq!(h.jobs(), 1);
    assert_eq!(h.server.metrics().publishes(Outcome::NotReady), 1);
    // Only the base codebase was written.
    assert_eq!(h.store.writes(), 1);

    catalog.set_endpoints("ns/web|8080", vec![ep("10.0.0.1")]);
    time::sleep(EVENT_DELAY).await;
    assert_eq!(h.jobs(), 2);
    assert_eq!(h.server.metrics().publishes(Outcome::Published), 1);
    assert_eq!(h.store.batches(), 2);
}

#[tokio::test(start_paused = true)]
async fn targeted_updates_skip_the_debounce() {
    let h = Harness::start(ready_catalog()).await;
    time::sleep(INITIAL_DELAY + Duration::from_secs(1)).await;
    assert_eq!(h.jobs(), 1);

    let proxy = h.server.registry().connected().pop().expect("proxy must be registered");
    h.broker.update_proxy(&proxy.uuid().to_string());
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.jobs(), 2);

    // Once the proxy quits, targeted updates are ignored.
    h.server.registry().unregister(&proxy.uuid());
    time::sleep(Duration::from_millis(1)).await;
    h.broker.update_proxy(&proxy.uuid().to_string());
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.jobs(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_reconciling() {
    let Harness {
        server,
        broker,
        signal,
        ..
    } = Harness::start(ready_catalog()).await;
    time::sleep(INITIAL_DELAY + Duration::from_secs(1)).await;
    assert_eq!(server.metrics().jobs_run(), 1);

    signal.drain().await;
    broker.broadcast_proxy_update();
    time::sleep(IDLE_DELAY * 2).await;
    assert_eq!(server.metrics().jobs_run(), 1);
}
