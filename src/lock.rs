//! Per-namespace mutual exclusion.
//!
//! At most one synchronization or deletion may be in flight for a
//! namespace. [`NamespaceLocks`] enforces this in two layers:
//!
//! 1. An async mutex per namespace, shared by clones of one
//!    `NamespaceLocks`. Build the [`Indexer`](crate::indexer::Indexer) and
//!    the [`Deleter`](crate::deleter::Deleter) from clones of one value so
//!    they exclude each other without touching the database.
//! 2. Optionally, a lease in a [`LeaseStore`] shared by every process that
//!    writes the same stores. The lease is renewed in the background while
//!    held and expires on its own if the holder dies.
//!
//! Writers call [`NamespaceGuard::release`] when done. A guard dropped
//! without it (early `?` return, panic, cancelled future) still frees the
//! in-process mutex immediately and releases the lease from a background
//! task; if that never runs, the lease expires after its TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{IndexError, Result};
use crate::models::Namespace;

/// Cross-process writer leases keyed by namespace.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Claim `namespace` for `owner` until `ttl` from now.
    ///
    /// Succeeds when nobody holds the namespace, the current lease has
    /// expired, or `owner` already holds it.
    async fn try_claim(&self, namespace: &Namespace, owner: &str, ttl: Duration) -> Result<bool>;

    /// Push the expiry of a held lease to `ttl` from now. `false` when
    /// `owner` no longer holds it.
    async fn renew(&self, namespace: &Namespace, owner: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease if `owner` still holds it.
    async fn release(&self, namespace: &Namespace, owner: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseOptions {
    /// Lease lifetime without renewal. Renewed every `ttl / 3` while held.
    pub ttl: Duration,
    /// Pause between claim attempts while another writer holds the lease.
    pub poll_interval: Duration,
    /// Give up waiting after this long; `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            poll_interval: Duration::from_millis(200),
            wait_timeout: None,
        }
    }
}

impl LeaseOptions {
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.lease_secs),
            poll_interval: Duration::from_millis(config.poll_millis),
            wait_timeout: config.wait_secs.map(Duration::from_secs),
        }
    }
}

type LockTable = Arc<Mutex<HashMap<Namespace, Arc<AsyncMutex<()>>>>>;

#[derive(Clone)]
struct Leases {
    store: Arc<dyn LeaseStore>,
    options: LeaseOptions,
}

#[derive(Clone, Default)]
pub struct NamespaceLocks {
    table: LockTable,
    leases: Option<Leases>,
}

impl NamespaceLocks {
    /// In-process locking only.
    pub fn new() -> Self {
        Self::default()
    }

    /// In-process locking backed by leases in `store`.
    pub fn with_leases(store: Arc<dyn LeaseStore>, options: LeaseOptions) -> Self {
        Self {
            table: LockTable::default(),
            leases: Some(Leases { store, options }),
        }
    }

    /// Wait for exclusive access to `namespace`.
    ///
    /// Fails with [`IndexError::StoreUnavailable`] when the lease store
    /// fails or the wait exceeds [`LeaseOptions::wait_timeout`].
    pub async fn acquire(&self, namespace: &Namespace) -> Result<NamespaceGuard> {
        debug!(namespace = %namespace, "waiting for namespace lock");
        let local = self.local_mutex(namespace)?.lock_owned().await;
        let mut guard = self.guard(namespace, local);

        if let Some(leases) = &self.leases {
            let started = Instant::now();
            let owner = Uuid::new_v4().to_string();
            loop {
                if leases
                    .store
                    .try_claim(namespace, &owner, leases.options.ttl)
                    .await?
                {
                    guard.lease = Some(HeldLease::start(leases, namespace, owner));
                    break;
                }
                if leases
                    .options
                    .wait_timeout
                    .is_some_and(|limit| started.elapsed() >= limit)
                {
                    return Err(IndexError::StoreUnavailable(format!(
                        "namespace {} is locked by another writer",
                        namespace
                    )));
                }
                debug!(namespace = %namespace, "namespace leased elsewhere, retrying");
                tokio::time::sleep(leases.options.poll_interval).await;
            }
        }

        Ok(guard)
    }

    /// Take the lock only if nobody holds it, in this process or elsewhere.
    pub async fn try_acquire(&self, namespace: &Namespace) -> Result<Option<NamespaceGuard>> {
        let Ok(local) = self.local_mutex(namespace)?.try_lock_owned() else {
            return Ok(None);
        };
        let mut guard = self.guard(namespace, local);

        if let Some(leases) = &self.leases {
            let owner = Uuid::new_v4().to_string();
            if !leases
                .store
                .try_claim(namespace, &owner, leases.options.ttl)
                .await?
            {
                return Ok(None);
            }
            guard.lease = Some(HeldLease::start(leases, namespace, owner));
        }

        Ok(Some(guard))
    }

    /// Namespaces with a lock entry, held or awaited.
    pub fn tracked(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn local_mutex(&self, namespace: &Namespace) -> Result<Arc<AsyncMutex<()>>> {
        let mut table = self.table.lock().map_err(|_| {
            IndexError::StoreUnavailable("namespace lock table poisoned".to_string())
        })?;
        Ok(table
            .entry(namespace.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    fn guard(&self, namespace: &Namespace, local: OwnedMutexGuard<()>) -> NamespaceGuard {
        NamespaceGuard {
            namespace: namespace.clone(),
            table: self.table.clone(),
            local: Some(local),
            lease: None,
        }
    }
}

/// Held while a namespace is being written.
pub struct NamespaceGuard {
    namespace: Namespace,
    table: LockTable,
    local: Option<OwnedMutexGuard<()>>,
    lease: Option<HeldLease>,
}

impl std::fmt::Debug for NamespaceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceGuard")
            .field("namespace", &self.namespace)
            .field("leased", &self.lease.is_some())
            .finish_non_exhaustive()
    }
}

impl NamespaceGuard {
    /// Release the lease (if any) and the in-process lock.
    ///
    /// A failed lease release is logged; the lease then lapses after its TTL.
    pub async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        self.lease.take();
        self.local.take();

        // Forget the namespace once nobody holds or awaits its mutex.
        if let Ok(mut table) = self.table.lock() {
            if table
                .get(&self.namespace)
                .is_some_and(|m| Arc::strong_count(m) == 1)
            {
                table.remove(&self.namespace);
            }
        }
    }
}

struct HeldLease {
    store: Arc<dyn LeaseStore>,
    namespace: Namespace,
    owner: String,
    heartbeat: JoinHandle<()>,
    released: bool,
}

impl HeldLease {
    fn start(leases: &Leases, namespace: &Namespace, owner: String) -> Self {
        let store = leases.store.clone();
        let ttl = leases.options.ttl;
        let period = (ttl / 3).max(Duration::from_millis(10));
        let heartbeat = {
            let store = store.clone();
            let namespace = namespace.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    match store.renew(&namespace, &owner, ttl).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(namespace = %namespace, "namespace lease lost");
                            break;
                        }
                        Err(e) => warn!(namespace = %namespace, error = %e, "lease renewal failed"),
                    }
                }
            })
        };

        debug!(namespace = %namespace, owner = %owner, "namespace lease acquired");
        Self {
            store,
            namespace: namespace.clone(),
            owner,
            heartbeat,
            released: false,
        }
    }

    async fn release(mut self) {
        self.heartbeat.abort();
        self.released = true;
        if let Err(e) = self.store.release(&self.namespace, &self.owner).await {
            warn!(namespace = %self.namespace, error = %e, "lease release failed");
        }
    }
}

impl Drop for HeldLease {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let namespace = self.namespace.clone();
            let owner = std::mem::take(&mut self.owner);
            handle.spawn(async move {
                if let Err(e) = store.release(&namespace, &owner).await {
                    warn!(namespace = %namespace, error = %e, "lease release failed");
                }
            });
        }
    }
}
