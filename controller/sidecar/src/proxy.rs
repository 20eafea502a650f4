use parking_lot::RwLock;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::sync::{watch, Mutex, MutexGuard};
use uuid::Uuid;

/// A sidecar the control plane configures.
///
/// Jobs for the same proxy serialize on its state lock.
#[derive(Debug)]
pub struct Proxy {
    uuid: Uuid,
    state: Mutex<ProxyState>,
    quit: watch::Sender<bool>,
}

#[derive(Debug, Default)]
pub struct ProxyState {
    /// The hash of the last configuration published for this proxy.
    pub etag: u64,
}

/// Proxies currently connected to the control plane.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: RwLock<BTreeMap<Uuid, Arc<Proxy>>>,
}

// === impl Proxy ===

impl Proxy {
    pub fn new() -> Self {
        let (quit, _) = watch::channel(false);
        Self {
            uuid: Uuid::new_v4(),
            state: Mutex::new(ProxyState::default()),
            quit,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub async fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().await
    }

    /// Stops the proxy's targeted update loop.
    pub fn quit(&self) {
        self.quit.send_replace(true);
    }

    pub fn has_quit(&self) -> bool {
        *self.quit.borrow()
    }

    pub(crate) fn quit_rx(&self) -> watch::Receiver<bool> {
        self.quit.subscribe()
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ProxyUUID={}]", self.uuid)
    }
}

// === impl ProxyRegistry ===

impl ProxyRegistry {
    pub fn connected(&self) -> Vec<Arc<Proxy>> {
        self.proxies.read().values().cloned().collect()
    }

    pub fn register(&self, proxy: Arc<Proxy>) {
        tracing::debug!(%proxy, "Registered proxy");
        self.proxies.write().insert(proxy.uuid(), proxy);
    }

    /// Removes a proxy and signals it to quit.
    pub fn unregister(&self, uuid: &Uuid) -> Option<Arc<Proxy>> {
        let proxy = self.proxies.write().remove(uuid)?;
        proxy.quit();
        tracing::debug!(%proxy, "Unregistered proxy");
        Some(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_tracks_connected_proxies() {
        let registry = ProxyRegistry::default();
        assert!(registry.connected().is_empty());

        let proxy = Arc::new(Proxy::new());
        registry.register(proxy.clone());
        assert_eq!(registry.connected().len(), 1);
        assert_eq!(proxy.to_string(), format!("[ProxyUUID={}]", proxy.uuid()));

        proxy.lock().await.etag = 7;
        assert_eq!(registry.connected()[0].lock().await.etag, 7);

        let mut quit = proxy.quit_rx();
        assert!(registry.unregister(&proxy.uuid()).is_some());
        assert!(registry.connected().is_empty());
        assert!(proxy.has_quit());
        quit.changed().await.expect("quit must be signaled");
        assert!(*quit.borrow());
    }
}
