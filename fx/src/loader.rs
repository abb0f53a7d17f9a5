//! Asynchronous feed loading.
//!
//! Each remote dataset is registered under a resource id together with the
//! listeners that ingest its payload. Loads run as tokio tasks, at most one
//! in flight per resource. A [`FirstLoadGate`] lets providers hold early
//! queries until their first data arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::feed::FeedFetcher;
use crate::resource_cache::ResourceCache;

/// Called with `(resource_id, payload)` after a successful fetch; returns
/// the number of dates ingested.
pub type LoadListener = Arc<dyn Fn(&str, &[u8]) -> usize + Send + Sync>;

/// Load progress of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    NotLoaded,
    Loading,
    Loaded,
    /// Last attempt failed. Does not block later attempts.
    LoadFailed,
}

/// Snapshot of a resource's load history.
#[derive(Debug, Clone)]
pub struct LoadState {
    pub status: LoadStatus,
    /// Free-text description of the last attempt.
    pub diagnostic: String,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for LoadState {
    fn default() -> Self {
        Self {
            status: LoadStatus::NotLoaded,
            diagnostic: "not loaded yet".to_string(),
            attempts: 0,
            last_attempt: None,
            last_success: None,
        }
    }
}

impl LoadState {
    /// True once any attempt has succeeded, even if a later one failed.
    pub fn has_loaded(&self) -> bool {
        self.last_success.is_some()
    }
}

/// One-shot gate released when a provider first holds data.
///
/// Released exactly once; every wait after release returns immediately.
pub struct FirstLoadGate {
    tx: watch::Sender<bool>,
}

impl FirstLoadGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Open the gate. Returns true for the call that actually opened it.
    pub fn release(&self) -> bool {
        self.tx.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        })
    }

    pub fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait up to `timeout` for the gate to open.
    ///
    /// On timeout the gate is opened anyway, so no caller waits twice, and
    /// `false` is returned.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let opened = tokio::time::timeout(timeout, rx.wait_for(|released| *released))
            .await
            .is_ok();
        if !opened {
            self.release();
        }
        opened
    }
}

impl Default for FirstLoadGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinates fetches, cache fallback and listener notification for a set
/// of resources.
pub struct LoadCoordinator {
    fetcher: Arc<dyn FeedFetcher>,
    cache: Option<Arc<dyn ResourceCache>>,
    urls: DashMap<String, String>,
    states: DashMap<String, LoadState>,
    listeners: RwLock<HashMap<String, Vec<LoadListener>>>,
}

impl LoadCoordinator {
    pub fn new(fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self {
            fetcher,
            cache: None,
            urls: DashMap::new(),
            states: DashMap::new(),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register `resource_id` at `url` and attach `listener`.
    ///
    /// If the resource cache already holds a payload for the resource, the
    /// listener is fed from it immediately.
    pub fn register(&self, resource_id: &str, url: &str, listener: LoadListener) {
        self.urls.insert(resource_id.to_string(), url.to_string());
        self.states.entry(resource_id.to_string()).or_default();
        self.listeners
            .write()
            .entry(resource_id.to_string())
            .or_default()
            .push(listener.clone());

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(resource_id)) {
            let dates = listener(resource_id, &cached.payload);
            info!(
                resource = resource_id,
                dates,
                cached_at = %cached.cached_at,
                "Bootstrapped from resource cache"
            );
        }
    }

    pub fn is_registered(&self, resource_id: &str) -> bool {
        self.urls.contains_key(resource_id)
    }

    pub fn state(&self, resource_id: &str) -> LoadState {
        self.states
            .get(resource_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Start a background load. Returns false if one is already in flight,
    /// or if there is no tokio runtime to run it on.
    pub fn trigger_load(self: &Arc<Self>, resource_id: &str) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(resource = resource_id, "No async runtime, load not started");
            return false;
        };
        if !self.begin_load(resource_id) {
            return false;
        }

        let this = Arc::clone(self);
        let id = resource_id.to_string();
        handle.spawn(async move {
            // Failures are recorded in the load state.
            let _ = this.run_load(&id).await;
        });
        true
    }

    /// Load and wait for the result. Returns the number of dates ingested;
    /// `Ok(0)` if a load was already in flight.
    pub async fn load_now(&self, resource_id: &str) -> FxResult<usize> {
        if !self.begin_load(resource_id) {
            debug!(resource = resource_id, "Load already in flight");
            return Ok(0);
        }
        self.run_load(resource_id).await
    }

    /// Reload `resource_id` every `interval`, starting immediately.
    pub fn schedule(self: &Arc<Self>, resource_id: &str, interval: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let id = resource_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if this.begin_load(&id) {
                    let _ = this.run_load(&id).await;
                }
            }
        })
    }

    /// Move to `Loading` unless a load is already running.
    fn begin_load(&self, resource_id: &str) -> bool {
        let mut state = self.states.entry(resource_id.to_string()).or_default();
        if state.status == LoadStatus::Loading {
            return false;
        }
        state.status = LoadStatus::Loading;
        state.attempts += 1;
        state.last_attempt = Some(Utc::now());
        true
    }

    #[instrument(skip(self))]
    async fn run_load(&self, resource_id: &str) -> FxResult<usize> {
        let Some(url) = self.urls.get(resource_id).map(|u| u.clone()) else {
            let err = FxError::Configuration(format!("resource {} is not registered", resource_id));
            self.finish(resource_id, LoadStatus::LoadFailed, err.to_string());
            return Err(err);
        };

        match self.fetcher.fetch(&url).await {
            Ok(payload) => {
                if let Some(cache) = &self.cache {
                    cache.put(resource_id, &payload);
                }
                let dates = self.notify(resource_id, &payload);
                if dates > 0 {
                    self.finish(
                        resource_id,
                        LoadStatus::Loaded,
                        format!("loaded {} dates from {}", dates, url),
                    );
                    info!(resource = resource_id, url = %url, dates, "Resource loaded");
                } else {
                    self.finish(
                        resource_id,
                        LoadStatus::LoadFailed,
                        format!("payload from {} yielded no rates", url),
                    );
                    warn!(resource = resource_id, url = %url, "Resource yielded no rates");
                }
                Ok(dates)
            }
            Err(e) => {
                warn!(resource = resource_id, url = %url, error = %e, "Fetch failed");
                let fallback = self
                    .cache
                    .as_ref()
                    .and_then(|c| c.get(resource_id))
                    .map(|cached| self.notify(resource_id, &cached.payload))
                    .unwrap_or(0);

                let diagnostic = if fallback > 0 {
                    format!("{}; served {} dates from cache", e, fallback)
                } else {
                    e.to_string()
                };
                self.finish(resource_id, LoadStatus::LoadFailed, diagnostic);

                if fallback > 0 {
                    Ok(fallback)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn notify(&self, resource_id: &str, payload: &[u8]) -> usize {
        let listeners: Vec<LoadListener> = self
            .listeners
            .read()
            .get(resource_id)
            .cloned()
            .unwrap_or_default();
        listeners.iter().map(|l| l(resource_id, payload)).sum()
    }

    fn finish(&self, resource_id: &str, status: LoadStatus, diagnostic: String) {
        let mut state = self.states.entry(resource_id.to_string()).or_default();
        state.status = status;
        state.diagnostic = diagnostic;
        if status == LoadStatus::Loaded {
            state.last_success = Some(Utc::now());
        }
    }
}
