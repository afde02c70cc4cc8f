//! Workspace cache
//!
//! Mirrors the workspace instances of one project namespace. A producer task
//! forwards watch events into a bounded queue; a single consumer task applies
//! them to the store and publishes the full value set after every mutation.
//!
//! Deleted keys are remembered so a late `Modified` cannot bring an instance
//! back. Only a fresh `Added` does.

use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use workpod_platform::{
    ControlPlane, InstanceKey, SelfIdentity, Tombstone, WatchEvent, WatchStream, WorkspaceInstance,
};

use crate::error::DaemonError;
use crate::local_store::LocalWorkspaceStore;
use crate::projection::EnrichedProjection;

/// Capacity of the queue between the watch and the consumer
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Delay before re-establishing a watch that ended
pub const REWATCH_DELAY: Duration = Duration::from_secs(5);

/// Most deleted keys remembered at once
pub const DELETED_KEYS_CAPACITY: usize = 4096;

/// Full cache contents as published to subscribers
pub type Snapshot = Arc<Vec<EnrichedProjection>>;

/// What and how a cache watches
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub namespace: String,
    pub selector: String,
    /// Only keep instances owned by this identity
    pub owner: Option<SelfIdentity>,
    pub rewatch_delay: Duration,
}

impl CacheOptions {
    pub fn new(namespace: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            selector: selector.into(),
            owner: None,
            rewatch_delay: REWATCH_DELAY,
        }
    }

    pub fn with_owner(mut self, owner: Option<SelfIdentity>) -> Self {
        self.owner = owner;
        self
    }
}

#[derive(Debug)]
enum CacheEvent {
    Watch(WatchEvent),
    /// Keys present upstream after a watch gap; anything else was deleted
    Resync(HashSet<InstanceKey>),
}

/// Recently deleted keys, oldest forgotten first
#[derive(Debug)]
struct DeletedKeys {
    keys: HashSet<InstanceKey>,
    order: VecDeque<InstanceKey>,
    capacity: usize,
}

impl Default for DeletedKeys {
    fn default() -> Self {
        Self::with_capacity(DELETED_KEYS_CAPACITY)
    }
}

impl DeletedKeys {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, key: &InstanceKey) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: InstanceKey) {
        if !self.keys.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, key: &InstanceKey) {
        if self.keys.remove(key) {
            self.order.retain(|k| k != key);
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&InstanceKey) -> bool) {
        self.keys.retain(|key| keep(key));
        let keys = &self.keys;
        self.order.retain(|key| keys.contains(key));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.keys.len()
    }
}

#[derive(Default)]
struct CacheState {
    instances: HashMap<InstanceKey, EnrichedProjection>,
    deleted: DeletedKeys,
    /// Every instance seen by the watch, owned or not
    uids: HashMap<String, WorkspaceInstance>,
}

struct CacheCore {
    state: Mutex<CacheState>,
    store: LocalWorkspaceStore,
    owner: Option<SelfIdentity>,
    snapshots: watch::Sender<Snapshot>,
}

/// Eventually-consistent mirror of one namespace's workspace instances
pub struct WorkspaceCache {
    control_plane: Arc<dyn ControlPlane>,
    options: CacheOptions,
    core: Arc<CacheCore>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkspaceCache {
    /// Create an empty cache; nothing is watched until [`open`](Self::open)
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        store: LocalWorkspaceStore,
        options: CacheOptions,
    ) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            control_plane,
            core: Arc::new(CacheCore {
                state: Mutex::new(CacheState::default()),
                store,
                owner: options.owner.clone(),
                snapshots,
            }),
            options,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    /// Establish the watch and start delivering events
    ///
    /// Opening an already open cache is a no-op.
    pub async fn open(&self) -> Result<(), DaemonError> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Ok(());
        }

        let stream = self
            .control_plane
            .watch_workspaces(&self.options.namespace, &self.options.selector)
            .await
            .map_err(|source| DaemonError::CacheOpen {
                namespace: self.options.namespace.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        tasks.push(tokio::spawn(produce(
            self.control_plane.clone(),
            self.options.clone(),
            stream,
            tx,
            self.cancel.clone(),
        )));
        tasks.push(tokio::spawn(consume(
            self.core.clone(),
            rx,
            self.cancel.clone(),
        )));

        info!(
            namespace = %self.options.namespace,
            selector = %self.options.selector,
            "Workspace cache opened"
        );
        Ok(())
    }

    /// Stop watching and wait for the tasks to finish
    pub async fn close(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Workspace cache task failed: {}", e);
            }
        }
    }

    /// Receive the full value set after every mutation
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.core.snapshots.subscribe()
    }

    /// Look up a cached projection by instance UID
    pub async fn get(&self, uid: &str) -> Option<EnrichedProjection> {
        let state = self.core.state.lock().await;
        state
            .instances
            .values()
            .find(|projection| projection.uid() == uid)
            .cloned()
    }

    /// Cached projections plus imported local workspaces backed by a seen instance
    ///
    /// An imported record is injected only when its UID resolves to an instance
    /// whose key is not already present, so every key appears once.
    pub async fn list(&self) -> Vec<EnrichedProjection> {
        let imported = self.core.store.list_imported().await;

        let state = self.core.state.lock().await;
        let mut seen: HashSet<InstanceKey> = state.instances.keys().cloned().collect();
        let mut projections: Vec<_> = state.instances.values().cloned().collect();

        for local in &imported {
            let Some(instance) = local.uid.as_deref().and_then(|uid| state.uids.get(uid)) else {
                continue;
            };
            if seen.insert(instance.key()) {
                projections.push(EnrichedProjection::from_local(instance.clone(), local));
            }
        }
        drop(state);

        sort_projections(&mut projections);
        projections
    }
}

impl Drop for WorkspaceCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Project a directly listed set of instances, applying the ownership filter
pub async fn project_instances(
    instances: Vec<WorkspaceInstance>,
    store: &LocalWorkspaceStore,
    owner: Option<&SelfIdentity>,
) -> Vec<EnrichedProjection> {
    let mut projections = Vec::with_capacity(instances.len());
    for instance in instances {
        if owner.is_some_and(|owner| !instance.is_owned_by(owner)) {
            continue;
        }
        projections.push(EnrichedProjection::build(instance, store).await);
    }
    sort_projections(&mut projections);
    projections
}

fn sort_projections(projections: &mut [EnrichedProjection]) {
    projections.sort_by(|a, b| a.instance.key().cmp(&b.instance.key()));
}

async fn produce(
    control_plane: Arc<dyn ControlPlane>,
    options: CacheOptions,
    mut stream: WatchStream,
    tx: mpsc::Sender<CacheEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                trace!("Queueing {:?} for {}", event.key(), options.namespace);
                if tx.send(CacheEvent::Watch(event)).await.is_err() {
                    return;
                }
                continue;
            }
            Some(Err(e)) => warn!(namespace = %options.namespace, "Workspace watch failed: {}", e),
            None => debug!(namespace = %options.namespace, "Workspace watch ended"),
        }

        match rewatch(control_plane.as_ref(), &options, &tx, &cancel).await {
            Some(next_stream) => stream = next_stream,
            None => return,
        }
    }
}

/// Re-list and re-watch until it works or the cache is closed
async fn rewatch(
    control_plane: &dyn ControlPlane,
    options: &CacheOptions,
    tx: &mpsc::Sender<CacheEvent>,
    cancel: &CancellationToken,
) -> Option<WatchStream> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(options.rewatch_delay) => {}
        }

        let current = match control_plane
            .list_workspaces(&options.namespace, &options.selector)
            .await
        {
            Ok(instances) => instances.iter().map(WorkspaceInstance::key).collect(),
            Err(e) => {
                warn!(namespace = %options.namespace, "Workspace re-list failed: {}", e);
                continue;
            }
        };
        if tx.send(CacheEvent::Resync(current)).await.is_err() {
            return None;
        }

        match control_plane
            .watch_workspaces(&options.namespace, &options.selector)
            .await
        {
            Ok(stream) => {
                info!(namespace = %options.namespace, "Workspace watch re-established");
                return Some(stream);
            }
            Err(e) => warn!(namespace = %options.namespace, "Workspace re-watch failed: {}", e),
        }
    }
}

async fn consume(core: Arc<CacheCore>, mut rx: mpsc::Receiver<CacheEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        if core.apply(event).await {
            core.publish().await;
        }
    }
}

impl CacheCore {
    /// Apply one event; true when the store changed
    async fn apply(&self, event: CacheEvent) -> bool {
        match event {
            CacheEvent::Watch(WatchEvent::Added(instance)) => self.upsert(instance, true).await,
            CacheEvent::Watch(WatchEvent::Modified(instance)) => {
                self.upsert(instance, false).await
            }
            CacheEvent::Watch(WatchEvent::Deleted(tombstone)) => self.remove(tombstone).await,
            CacheEvent::Resync(current) => self.resync(current).await,
        }
    }

    async fn upsert(&self, instance: WorkspaceInstance, added: bool) -> bool {
        let key = instance.key();

        {
            let mut state = self.state.lock().await;
            if !instance.metadata.uid.is_empty() {
                state
                    .uids
                    .insert(instance.metadata.uid.clone(), instance.clone());
            }
            if added {
                state.deleted.remove(&key);
            } else if state.deleted.contains(&key) {
                trace!("Ignoring update for deleted {}", key);
                return false;
            }
        }

        if let Some(owner) = &self.owner {
            if !instance.is_owned_by(owner) {
                trace!("Ignoring {} owned by someone else", key);
                return false;
            }
        }

        // Reads the local store, so stays outside the lock
        let projection = EnrichedProjection::build(instance, &self.store).await;

        self.state.lock().await.instances.insert(key, projection);
        true
    }

    async fn remove(&self, tombstone: Tombstone) -> bool {
        let mut state = self.state.lock().await;

        match &tombstone.uid {
            Some(uid) => {
                state.uids.remove(uid);
            }
            None => state.uids.retain(|_, instance| instance.key() != tombstone.key),
        }
        state.deleted.insert(tombstone.key.clone());
        state.instances.remove(&tombstone.key).is_some()
    }

    async fn resync(&self, current: HashSet<InstanceKey>) -> bool {
        let mut state = self.state.lock().await;

        let gone: Vec<InstanceKey> = state
            .instances
            .keys()
            .filter(|key| !current.contains(*key))
            .cloned()
            .collect();

        state.uids.retain(|_, instance| current.contains(&instance.key()));
        for key in &gone {
            debug!("Dropping {} missed during watch gap", key);
            state.instances.remove(key);
        }
        // The new watch starts after the re-list, so stale updates for absent keys cannot follow
        state.deleted.retain(|key| current.contains(key));
        !gone.is_empty()
    }

    async fn publish(&self) {
        let mut values: Vec<_> = self.state.lock().await.instances.values().cloned().collect();
        sort_projections(&mut values);
        self.snapshots.send_replace(Arc::new(values));
    }
}
