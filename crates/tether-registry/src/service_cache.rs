//! Mirrored view of a remote cluster's Services
//!
//! The registry only drives the lifecycle of a cache: start it once, reset
//! it onto a new client when credentials rotate, enumerate it, and close it
//! when the cluster goes away. Mirrored objects survive a reset; keys that no
//! longer exist are swept once the new watch completes its initial list.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_common::kube_utils::WATCH_TIMEOUT_SECS;
use tether_common::Error;

use crate::remote_client::RemoteClient;

/// Lifecycle contract of a per-cluster service cache
#[async_trait]
pub trait ServiceCache: Send + Sync {
    /// Begin mirroring under `cancel`
    async fn start(&self, cancel: CancellationToken) -> Result<(), Error>;

    /// Continue mirroring through `client`, keeping what is already mirrored
    async fn reset_client(&self, client: RemoteClient) -> Result<(), Error>;

    /// Visit every mirrored Service
    ///
    /// Safe to call while the cache is refreshing in the background.
    fn for_each(&self, visit: &mut dyn FnMut(&Arc<Service>));

    /// Stop mirroring
    fn close(&self);
}

/// Creates service caches for newly registered clusters
pub trait ServiceCacheFactory: Send + Sync {
    /// Cache for `cluster`, bound to `client` when one could be built
    fn create(&self, cluster: &str, client: Option<RemoteClient>) -> Arc<dyn ServiceCache>;
}

/// Mirrored Services, stamped with the watch generation allowed to write them
#[derive(Default)]
struct MirroredServices {
    generation: u64,
    services: BTreeMap<String, Arc<Service>>,
}

type ServiceMap = Arc<RwLock<MirroredServices>>;

#[derive(Default)]
struct CacheState {
    client: Option<RemoteClient>,
    parent: Option<CancellationToken>,
    watch: Option<CancellationToken>,
    closed: bool,
}

/// Service cache fed by a `kube::runtime::watcher` on the remote cluster
pub struct WatchedServiceCache {
    cluster: String,
    state: Mutex<CacheState>,
    services: ServiceMap,
}

impl WatchedServiceCache {
    /// Cache for `cluster`; without a client it stays empty until reset
    pub fn new(cluster: impl Into<String>, client: Option<RemoteClient>) -> Self {
        Self {
            cluster: cluster.into(),
            state: Mutex::new(CacheState {
                client,
                ..Default::default()
            }),
            services: Arc::default(),
        }
    }

    /// True while a watch task is feeding the cache
    pub fn is_watching(&self) -> bool {
        self.state.lock().watch.is_some()
    }

    /// Number of mirrored Services
    pub fn len(&self) -> usize {
        self.services.read().services.len()
    }

    /// True when nothing is mirrored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_watch(&self, client: RemoteClient, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        let stop = token.clone();
        let api: Api<Service> = Api::all(client.kube().clone());
        let mut mirror = ServiceMirror::new(self.services.clone());
        let cluster = self.cluster.clone();

        tokio::spawn(async move {
            debug!(cluster = %cluster, "Service watch started");
            let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
            let mut stream = watcher::watcher(api, config)
                .default_backoff()
                .boxed();
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(_)) if stop.is_cancelled() => break,
                        Some(Ok(event)) => mirror.apply(event),
                        Some(Err(e)) => {
                            warn!(cluster = %cluster, error = %e, "Service watch error");
                        }
                        None => break,
                    },
                }
            }
            debug!(cluster = %cluster, "Service watch stopped");
        });

        token
    }
}

#[async_trait]
impl ServiceCache for WatchedServiceCache {
    async fn start(&self, cancel: CancellationToken) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::service_cache(&self.cluster, "cache is closed"));
        }
        if state.parent.is_some() {
            return Err(Error::service_cache(&self.cluster, "cache already started"));
        }
        state.parent = Some(cancel.clone());
        match state.client.clone() {
            Some(client) => state.watch = Some(self.spawn_watch(client, &cancel)),
            None => warn!(cluster = %self.cluster, "No client available, service cache stays empty"),
        }
        Ok(())
    }

    async fn reset_client(&self, client: RemoteClient) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::service_cache(&self.cluster, "cache is closed"));
        }
        state.client = Some(client.clone());
        let Some(parent) = state.parent.clone() else {
            return Ok(());
        };
        if let Some(previous) = state.watch.take() {
            previous.cancel();
        }
        state.watch = Some(self.spawn_watch(client, &parent));
        info!(cluster = %self.cluster, "Service cache switched to new client");
        Ok(())
    }

    fn for_each(&self, visit: &mut dyn FnMut(&Arc<Service>)) {
        for service in self.services.read().services.values() {
            visit(service);
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.parent = None;
        if let Some(watch) = state.watch.take() {
            watch.cancel();
        }
    }
}

/// Factory producing [`WatchedServiceCache`]s
#[derive(Clone, Copy, Debug, Default)]
pub struct WatchedServiceCacheFactory;

impl ServiceCacheFactory for WatchedServiceCacheFactory {
    fn create(&self, cluster: &str, client: Option<RemoteClient>) -> Arc<dyn ServiceCache> {
        Arc::new(WatchedServiceCache::new(cluster, client))
    }
}

/// Applies watch events to the shared map
///
/// Creating a mirror retires every earlier mirror of the same map, so a
/// watch that is still draining after a reset cannot overwrite or sweep
/// what its successor mirrored.
struct ServiceMirror {
    services: ServiceMap,
    generation: u64,
    relist: Option<HashSet<String>>,
}

impl ServiceMirror {
    fn new(services: ServiceMap) -> Self {
        let generation = {
            let mut mirrored = services.write();
            mirrored.generation += 1;
            mirrored.generation
        };
        Self {
            services,
            generation,
            relist: None,
        }
    }

    fn apply(&mut self, event: Event<Service>) {
        let mut mirrored = self.services.write();
        if mirrored.generation != self.generation {
            return;
        }
        let services = &mut mirrored.services;
        match event {
            Event::Init => self.relist = Some(HashSet::new()),
            Event::InitApply(service) => {
                let key = service_key(&service);
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(key.clone());
                }
                services.insert(key, Arc::new(service));
            }
            Event::InitDone => {
                if let Some(seen) = self.relist.take() {
                    services.retain(|key, _| seen.contains(key));
                }
            }
            Event::Apply(service) => {
                services.insert(service_key(&service), Arc::new(service));
            }
            Event::Delete(service) => {
                services.remove(&service_key(&service));
            }
        }
    }
}

fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    )
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory cache recording every lifecycle call

    use super::*;

    #[derive(Default)]
    pub(crate) struct FakeServiceCache {
        pub cluster: String,
        pub initial_client: Option<RemoteClient>,
        pub starts: Mutex<u32>,
        pub resets: Mutex<Vec<RemoteClient>>,
        pub closed: Mutex<bool>,
        pub services: RwLock<Vec<Arc<Service>>>,
        pub fail_reset: bool,
    }

    #[async_trait]
    impl ServiceCache for FakeServiceCache {
        async fn start(&self, _cancel: CancellationToken) -> Result<(), Error> {
            *self.starts.lock() += 1;
            Ok(())
        }

        async fn reset_client(&self, client: RemoteClient) -> Result<(), Error> {
            self.resets.lock().push(client);
            if self.fail_reset {
                return Err(Error::service_cache(&self.cluster, "reset refused"));
            }
            Ok(())
        }

        fn for_each(&self, visit: &mut dyn FnMut(&Arc<Service>)) {
            for service in self.services.read().iter() {
                visit(service);
            }
        }

        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    /// Factory remembering every cache it created, by cluster name
    #[derive(Default)]
    pub(crate) struct FakeServiceCacheFactory {
        pub created: Mutex<Vec<Arc<FakeServiceCache>>>,
        pub fail_reset: bool,
    }

    impl FakeServiceCacheFactory {
        pub(crate) fn latest(&self, cluster: &str) -> Arc<FakeServiceCache> {
            self.created
                .lock()
                .iter()
                .rev()
                .find(|c| c.cluster == cluster)
                .cloned()
                .unwrap_or_else(|| panic!("no cache created for {cluster}"))
        }
    }

    impl ServiceCacheFactory for FakeServiceCacheFactory {
        fn create(&self, cluster: &str, client: Option<RemoteClient>) -> Arc<dyn ServiceCache> {
            let cache = Arc::new(FakeServiceCache {
                cluster: cluster.to_string(),
                initial_client: client,
                fail_reset: self.fail_reset,
                ..Default::default()
            });
            self.created.lock().push(cache.clone());
            cache
        }
    }
}
