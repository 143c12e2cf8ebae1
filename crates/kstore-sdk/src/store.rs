use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, info};

use kstore_client::Client;
use kstore_events::{
    event_collection, register_event_type, Broadcaster, ClientSink, EventRecorder,
    RecordingClient, Subscription,
};
use kstore_registry::{RegistryError, RegistryResult, ResourceDescriptor, TypeRegistry};
use kstore_storage::{InMemoryStorage, KeyScheme, Storage};
use kstore_types::{CollectionIdentity, Resource};

use crate::config::StoreConfig;
use crate::error::SdkResult;

static DEFAULT_REGISTRY: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::new()));

/// The process-wide registry used by [`Store::open_default`].
///
/// Library code should take a registry as a parameter instead.
pub fn default_registry() -> Arc<TypeRegistry> {
    DEFAULT_REGISTRY.clone()
}

/// A storage backend, registry, client and event pipeline wired together.
pub struct Store {
    config: StoreConfig,
    storage: Arc<dyn Storage>,
    registry: Arc<TypeRegistry>,
    client: Client,
    broadcaster: Broadcaster,
    recorder: EventRecorder,
    event_sink: Option<Subscription>,
}

impl Store {
    /// Open an in-memory store with a fresh registry.
    ///
    /// With events enabled this must run inside a tokio runtime.
    pub fn open(config: StoreConfig) -> SdkResult<Self> {
        let registry = Arc::new(TypeRegistry::with_config(config.registry.clone()));
        Self::open_with_registry(config, registry)
    }

    /// Open with default settings over [`default_registry`].
    pub fn open_default() -> SdkResult<Self> {
        Self::open_with_registry(StoreConfig::default(), default_registry())
    }

    pub fn open_with_registry(config: StoreConfig, registry: Arc<TypeRegistry>) -> SdkResult<Self> {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::with_config(config.memory.clone()));
        Self::open_with(config, storage, registry)
    }

    /// Open over a caller-supplied backend.
    pub fn open_with(
        config: StoreConfig,
        storage: Arc<dyn Storage>,
        registry: Arc<TypeRegistry>,
    ) -> SdkResult<Self> {
        if !registry.is_resource_registered(&event_collection()) {
            match register_event_type(&registry) {
                // Another store sharing the registry got there first.
                Ok(()) | Err(RegistryError::AlreadyRegistered(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let keys = KeyScheme::new(config.keys.clone())?;
        let client = Client::with_config(storage.clone(), registry.clone(), keys, config.client.clone());

        let broadcaster = Broadcaster::new(config.broadcaster.clone());
        let event_sink = if config.events.enabled {
            let sink = Arc::new(ClientSink::new(client.clone()));
            Some(broadcaster.start_recording_to_sink(sink, config.sink.clone())?)
        } else {
            None
        };
        let recorder = broadcaster.new_recorder(config.events.component.clone());

        info!(
            prefix = %config.keys.prefix,
            tenant = config.keys.tenant.as_deref().unwrap_or(""),
            events = config.events.enabled,
            "store opened"
        );
        Ok(Self {
            config,
            storage,
            registry,
            client,
            broadcaster,
            recorder,
            event_sink,
        })
    }

    /// Register a resource type with this store's registry.
    pub fn register<T: Resource>(
        &self,
        collection: CollectionIdentity,
        descriptor: ResourceDescriptor,
    ) -> RegistryResult<()> {
        self.registry.register_type::<T>(collection, descriptor)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// Recorder reporting as `component` instead of the configured one.
    pub fn recorder_for(&self, component: impl Into<String>) -> EventRecorder {
        self.broadcaster.new_recorder(component)
    }

    /// Client that emits an event for each of its writes.
    pub fn recording_client(&self) -> RecordingClient {
        RecordingClient::new(self.client.clone(), self.recorder.clone())
    }

    /// Stop event delivery. Objects already stored stay readable.
    pub fn shutdown(&self) {
        if let Some(sink) = &self.event_sink {
            sink.stop();
        }
        self.broadcaster.shutdown();
        debug!("store shut down");
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.config.keys)
            .field("events", &self.config.events.enabled)
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}
