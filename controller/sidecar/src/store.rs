//! The configuration store sidecars load their codebases from.
//!
//! A codebase is a versioned directory of files. A derived codebase inherits
//! every file of its base and overrides some of them.

use anyhow::Result;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// The file each proxy codebase carries its configuration in.
pub const CONFIG_FILE: &str = "config.json";

const BASE_CODEBASE: &str = "ecnet/base";
const PROXY_CODEBASE_ROOT: &str = "ecnet";
const PROXY_CODEBASE: &str = "proxy.bridge.ecnet";

#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn is_up(&self) -> Result<bool>;

    async fn get_codebase(&self, path: &str) -> Result<Option<Codebase>>;

    /// Creates `path` as a codebase derived from `base`. Returns false if the
    /// store refused to derive it.
    async fn derive_codebase(&self, path: &str, base: &str, version: u64) -> Result<bool>;

    /// Writes files into codebases, creating them as needed.
    async fn batch(&self, version: &str, batches: Vec<Batch>) -> Result<bool>;

    async fn delete(&self, path: &str) -> Result<bool>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Codebase {
    pub path: String,
    pub version: String,
    pub base: Option<String>,
    /// Files set on this codebase, excluding those inherited from its base.
    pub files: BTreeMap<String, Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub basepath: String,
    pub items: Vec<BatchItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchItem {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Locates the codebases the control plane manages, optionally nested under
/// a repo-wide prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Codebases {
    base: String,
    proxy_root: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("configuration store unavailable")]
    Unavailable,

    #[error("codebase {0} not found")]
    NotFound(String),
}

/// A process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    codebases: Mutex<BTreeMap<String, Codebase>>,
    down: AtomicBool,
    fail_derives: AtomicBool,
    fail_batches: AtomicBool,
    derives: AtomicUsize,
    batches: AtomicUsize,
    deletes: AtomicUsize,
}

// === impl Codebases ===

impl Codebases {
    /// `prefix` is trimmed of slashes; an empty prefix places codebases at
    /// the store root.
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return Self {
                base: BASE_CODEBASE.to_string(),
                proxy_root: PROXY_CODEBASE_ROOT.to_string(),
            };
        }
        Self {
            base: format!("{prefix}/{BASE_CODEBASE}"),
            proxy_root: format!("{prefix}/{PROXY_CODEBASE_ROOT}"),
        }
    }

    /// The codebase every proxy codebase derives from.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The base as referenced when deriving from it.
    pub fn base_repo(&self) -> String {
        format!("/{}", self.base)
    }

    pub fn proxy(&self) -> String {
        format!("{}/{PROXY_CODEBASE}", self.proxy_root)
    }
}

impl Default for Codebases {
    fn default() -> Self {
        Self::new("")
    }
}

// === impl MemoryStore ===

impl MemoryStore {
    /// Makes the store report itself down and fail every call.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_derives(&self, fail: bool) {
        self.fail_derives.store(fail, Ordering::SeqCst);
    }

    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn derives(&self) -> usize {
        self.derives.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Every mutating call attempted against the store.
    pub fn writes(&self) -> usize {
        self.derives() + self.batches() + self.deletes()
    }

    /// Reads a file, falling through to base codebases.
    pub fn file(&self, path: &str, filename: &str) -> Option<Vec<u8>> {
        let codebases = self.codebases.lock();
        let mut next = Some(normalize(path));
        while let Some(path) = next {
            let codebase = codebases.get(&path)?;
            if let Some(content) = codebase.files.get(filename) {
                return Some(content.clone());
            }
            next = codebase.base.as_deref().map(normalize);
        }
        None
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigStore for MemoryStore {
    async fn is_up(&self) -> Result<bool> {
        Ok(!self.down.load(Ordering::SeqCst))
    }

    async fn get_codebase(&self, path: &str) -> Result<Option<Codebase>> {
        self.check_up()?;
        Ok(self.codebases.lock().get(&normalize(path)).cloned())
    }

    async fn derive_codebase(&self, path: &str, base: &str, version: u64) -> Result<bool> {
        self.derives.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        if self.fail_derives.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let path = normalize(path);
        let base = normalize(base);
        let mut codebases = self.codebases.lock();
        if !codebases.contains_key(&base) {
            return Err(StoreError::NotFound(base).into());
        }
        let codebase = codebases.entry(path.clone()).or_insert_with(|| Codebase {
            path,
            ..Default::default()
        });
        codebase.base = Some(base);
        codebase.version = version.to_string();
        Ok(true)
    }

    async fn batch(&self, version: &str, batches: Vec<Batch>) -> Result<bool> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable.into());
        }

        let mut codebases = self.codebases.lock();
        for Batch { basepath, items } in batches {
            let path = normalize(&basepath);
            let codebase = codebases.entry(path.clone()).or_insert_with(|| Codebase {
                path,
                ..Default::default()
            });
            codebase.version = version.to_string();
            codebase
                .files
                .extend(items.into_iter().map(|i| (i.filename, i.content)));
        }
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        Ok(self.codebases.lock().remove(&normalize(path)).is_some())
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}
