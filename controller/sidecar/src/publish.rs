//! Writes compiled configurations into the configuration store.
//!
//! A configuration is content-addressed: its hash, computed with the
//! timestamp and version cleared, doubles as the proxy's ETag. Publishing a
//! configuration whose hash matches the ETag is a no-op.

use crate::{
    conf::PipyConf,
    hash::fnv1_64,
    store::{Batch, BatchItem, Codebases, ConfigStore, CONFIG_FILE},
};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct Publisher {
    store: Arc<dyn ConfigStore>,
    codebases: Codebases,
    latest: RwLock<Option<PipyConf>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Published,
    Unchanged,
    NotReady,
    /// The store rejected the configuration; the proxy codebase was rolled
    /// back.
    Failed,
}

// === impl Publisher ===

impl Publisher {
    pub fn new(store: Arc<dyn ConfigStore>, codebases: Codebases) -> Self {
        Self {
            store,
            codebases,
            latest: RwLock::new(None),
        }
    }

    pub fn codebases(&self) -> &Codebases {
        &self.codebases
    }

    /// Publishes `conf` unless it matches `etag`. `etag` is only advanced
    /// once the store holds the configuration.
    pub async fn publish(&self, etag: &mut u64, mut conf: PipyConf) -> Outcome {
        let mut latest = self.latest.write().await;

        conf.ts = None;
        conf.version = None;
        let hash = match serde_json::to_vec(&conf) {
            Ok(bytes) => fnv1_64(&bytes),
            Err(error) => {
                tracing::error!(%error, "Failed to serialize sidecar configuration");
                return Outcome::Failed;
            }
        };
        if hash == *etag {
            tracing::trace!(etag = hash, "Configuration unchanged");
            return Outcome::Unchanged;
        }

        match self.write(hash, &mut conf).await {
            Ok(true) => {
                tracing::debug!(version = hash, "Published configuration");
                *etag = hash;
                *latest = Some(conf);
                Outcome::Published
            }
            Ok(false) => {
                tracing::warn!(version = hash, "Configuration store refused the update");
                self.rollback().await;
                Outcome::Failed
            }
            Err(error) => {
                tracing::warn!(%error, version = hash, "Failed to publish configuration");
                self.rollback().await;
                Outcome::Failed
            }
        }
    }

    /// The last published configuration as compact JSON, or `{}` if nothing
    /// was published yet.
    pub async fn latest_json(&self) -> Result<String> {
        match &*self.latest.read().await {
            Some(conf) => Ok(serde_json::to_string(conf)?),
            None => Ok("{}".to_string()),
        }
    }

    async fn write(&self, hash: u64, conf: &mut PipyConf) -> Result<bool> {
        let proxy = self.codebases.proxy();
        let derived = self
            .store
            .derive_codebase(&proxy, &self.codebases.base_repo(), hash.wrapping_sub(2))
            .await?;
        if !derived {
            return Ok(false);
        }

        conf.ts = Some(Utc::now());
        conf.version = Some(hash.to_string());
        let content = to_pretty_json(conf)?;
        self.store
            .batch(
                &hash.wrapping_sub(1).to_string(),
                vec![Batch {
                    basepath: proxy,
                    items: vec![BatchItem {
                        filename: CONFIG_FILE.to_string(),
                        content,
                    }],
                }],
            )
            .await
    }

    async fn rollback(&self) {
        let proxy = self.codebases.proxy();
        if let Err(error) = self.store.delete(&proxy).await {
            tracing::warn!(%error, codebase = %proxy, "Failed to roll back proxy codebase");
        }
    }
}

// === impl Outcome ===

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Unchanged => "unchanged",
            Self::NotReady => "not_ready",
            Self::Failed => "failed",
        }
    }
}

/// Pretty-prints with a single-space indent, as sidecars expect.
pub(crate) fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b" "));
    value.serialize(&mut ser)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    async fn base_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        store
            .batch(
                "0",
                vec![Batch {
                    basepath: Codebases::default().base().to_string(),
                    items: vec![BatchItem {
                        filename: CONFIG_FILE.to_string(),
                        content: b"{}".to_vec(),
                    }],
                }],
            )
            .await
            .expect("base batch must succeed");
        store
    }

    fn conf(level: &str) -> PipyConf {
        let mut conf = PipyConf::default();
        conf.set_sidecar_log_level(level);
        conf
    }

    #[tokio::test]
    async fn identical_configs_publish_once() {
        let store = base_store().await;
        let publisher = Publisher::new(store.clone(), Codebases::default());
        assert_eq!(publisher.latest_json().await.expect("must serialize"), "{}");

        let mut etag = 0;
        assert_eq!(publisher.publish(&mut etag, conf("debug")).await, Outcome::Published);
        assert_ne!(etag, 0);
        let published = etag;
        assert_eq!(publisher.publish(&mut etag, conf("debug")).await, Outcome::Unchanged);
        assert_eq!(etag, published);

        // The base batch plus one derive and one batch.
        assert_eq!(store.batches(), 2);
        assert_eq!(store.derives(), 1);

        let codebase = store
            .get_codebase(&Codebases::default().proxy())
            .await
            .expect("store is up")
            .expect("proxy codebase must exist");
        assert_eq!(codebase.version, etag.wrapping_sub(1).to_string());

        let latest: serde_json::Value =
            serde_json::from_str(&publisher.latest_json().await.expect("must serialize"))
                .expect("latest must be json");
        assert_eq!(latest["Version"], serde_json::json!(etag.to_string()));
        assert_eq!(latest["Spec"]["SidecarLogLevel"], "debug");
        assert!(latest["Ts"].is_string());

        let stored = store
            .file(&Codebases::default().proxy(), CONFIG_FILE)
            .expect("config must be stored");
        let stored = String::from_utf8(stored).expect("config must be utf-8");
        assert!(stored.starts_with("{\n \"Ts\": "), "{stored}");
    }

    #[tokio::test]
    async fn changed_configs_republish() {
        let store = base_store().await;
        let publisher = Publisher::new(store.clone(), Codebases::default());
        let mut etag = 0;
        publisher.publish(&mut etag, conf("debug")).await;
        let first = etag;
        assert_eq!(publisher.publish(&mut etag, conf("info")).await, Outcome::Published);
        assert_ne!(etag, first);
        assert_eq!(store.batches(), 3);
    }

    #[tokio::test]
    async fn failed_batches_roll_back() {
        let store = base_store().await;
        store.fail_batches(true);
        let publisher = Publisher::new(store.clone(), Codebases::default());

        let mut etag = 0;
        assert_eq!(publisher.publish(&mut etag, conf("debug")).await, Outcome::Failed);
        assert_eq!(etag, 0);
        assert_eq!(store.deletes(), 1);
        assert!(store
            .get_codebase(&Codebases::default().proxy())
            .await
            .expect("store is up")
            .is_none());
        assert_eq!(publisher.latest_json().await.expect("must serialize"), "{}");

        // The next attempt is not mistaken for a no-op.
        store.fail_batches(false);
        assert_eq!(publisher.publish(&mut etag, conf("debug")).await, Outcome::Published);
    }

    #[tokio::test]
    async fn refused_derives_roll_back() {
        let store = base_store().await;
        store.fail_derives(true);
        let publisher = Publisher::new(store.clone(), Codebases::default());

        let mut etag = 0;
        assert_eq!(publisher.publish(&mut etag, conf("debug")).await, Outcome::Failed);
        assert_eq!(etag, 0);
        assert_eq!(store.deletes(), 1);
        // Only the base batch was written.
        assert_eq!(store.batches(), 1);
    }

    #[test]
    fn pretty_json_uses_single_space_indent() {
        let json = to_pretty_json(&serde_json::json!({ "a": [1] })).expect("must serialize");
        assert_eq!(
            String::from_utf8(json).expect("utf-8"),
            "{\n \"a\": [\n  1\n ]\n}"
        );
    }
}
