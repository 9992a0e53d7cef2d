//! Process-wide `Service` wiring.
//!
//! The bus handle, cache, subscription table, and configuration are modeled
//! as one process-wide value with explicit `init`/`shutdown` entry points
//! and init-once/shutdown-once lifetime enforcement, rather than as ad hoc
//! globals scattered across modules.

use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::auth::AuthorizationHook;
use crate::cache::ParameterCache;
use crate::config::AppConfig;
use crate::engine::{EngineConfig, TransactionEngine};
use crate::events::{EventPipeline, EventPipelineConfig};
use crate::parambus::registry::SubscriptionRegistry;
use crate::parambus::{AdapterError, ParambusAdapter};
use crate::translator::Translator;
use crate::uplink::Frame;

/// Errors raised while bringing the process-wide service up or down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// [`Service::init`] was called while a service was already live.
    #[error("service already initialized")]
    AlreadyInitialized,
    /// [`Service::shutdown`] was called with no service live.
    #[error("service not initialized")]
    NotInitialized,
    /// The parambus adapter failed to open or close its bus handle.
    #[error("parambus adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// The process-wide collection of shared collaborators every request
/// handler needs.
pub struct Service {
    /// The parambus adapter's shared handle.
    pub adapter: Arc<dyn ParambusAdapter>,
    /// The parameter value cache.
    pub cache: Arc<ParameterCache>,
    /// The subscription refcount table.
    pub registry: Arc<SubscriptionRegistry>,
    /// The protocol translator, wired to every collaborator above.
    pub translator: Arc<Translator>,
    /// The transaction engine, sharing the same adapter and cache.
    pub engine: Arc<TransactionEngine>,
    /// The configuration this service was initialized with.
    pub config: AppConfig,
    /// Every frame published by the event pipeline or the transaction
    /// engine's notifier; consumed once by the uplink session's send loop.
    outbound_receiver: Mutex<Option<UnboundedReceiver<Frame>>>,
    /// The event pipeline, paired with its inbound `BusEvent` receiver,
    /// consumed once by whoever spawns it (normally the binary entry point).
    event_pipeline: Mutex<Option<(EventPipeline, UnboundedReceiver<crate::parambus::BusEvent>)>>,
}

static GLOBAL: OnceLock<Mutex<Option<Arc<Service>>>> = OnceLock::new();

fn global_slot() -> &'static Mutex<Option<Arc<Service>>> {
    GLOBAL.get_or_init(|| Mutex::new(None))
}

impl Service {
    /// Bring up the process-wide service: open the bus handle, build the
    /// cache/registry/translator/engine, and install the result as the
    /// global instance.
    ///
    /// # Errors
    /// Returns [`ServiceError::AlreadyInitialized`] if a service is already
    /// live, or [`ServiceError::Adapter`] if `adapter.open` fails.
    pub async fn init(
        config: AppConfig,
        adapter: Arc<dyn ParambusAdapter>,
        authz: AuthorizationHook,
    ) -> Result<Arc<Self>, ServiceError> {
        let mut slot = global_slot().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_some() {
            return Err(ServiceError::AlreadyInitialized);
        }
        adapter.open(&config.component).await?;

        let cache = Arc::new(ParameterCache::new(
            config.max_entries,
            std::time::Duration::from_secs(config.default_ttl_seconds),
            config.enable_stats,
        ));
        let registry = Arc::new(SubscriptionRegistry::new(adapter.clone()));
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();

        let translator = Arc::new(Translator::new(
            adapter.clone(),
            cache.clone(),
            registry.clone(),
            event_tx,
            authz,
        ));
        let engine = Arc::new(TransactionEngine::new(
            adapter.clone(),
            cache.clone(),
            EngineConfig {
                max_transaction_size: config.max_transaction_size,
                transaction_timeout: std::time::Duration::from_secs(config.transaction_timeout_seconds),
                enable_rollback: config.enable_rollback,
                enable_validation: config.enable_validation,
            },
        )
        .with_notifier(outbound_tx.clone(), config.service_name.clone(), config.events_endpoint.clone()));

        let event_pipeline = EventPipeline::new(
            adapter.clone(),
            cache.clone(),
            outbound_tx,
            EventPipelineConfig {
                service_name: config.service_name.clone(),
                events_endpoint: config.events_endpoint.clone(),
                clients_table_prefix: config.clients_table_prefix.clone(),
                fill_old_value_from_cache: config.notify_fill_old_value_from_cache,
            },
        );

        let service = Arc::new(Self {
            adapter,
            cache,
            registry,
            translator,
            engine,
            config,
            outbound_receiver: Mutex::new(Some(outbound_rx)),
            event_pipeline: Mutex::new(Some((event_pipeline, event_rx))),
        });
        *slot = Some(service.clone());
        Ok(service)
    }

    /// Take the outbound frame receiver, for the uplink session's send loop
    /// to drain. `None` if already taken.
    #[must_use]
    pub fn take_outbound_receiver(&self) -> Option<UnboundedReceiver<Frame>> {
        self.outbound_receiver.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }

    /// Take the event pipeline and its inbound channel, for the caller to
    /// spawn as a background task. `None` if already taken.
    #[must_use]
    pub fn take_event_pipeline(&self) -> Option<(EventPipeline, UnboundedReceiver<crate::parambus::BusEvent>)> {
        self.event_pipeline.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }

    /// The currently-live global service instance, if [`Service::init`] has
    /// run and [`Service::shutdown`] has not yet torn it down.
    #[must_use]
    pub fn global() -> Option<Arc<Self>> {
        global_slot().lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Tear down the process-wide service: unsubscribe every live
    /// subscription (in reverse registration order is the registry's own
    /// concern; this closes the bus handle) and clear the global slot.
    ///
    /// # Errors
    /// Returns [`ServiceError::NotInitialized`] if no service is live, or
    /// [`ServiceError::Adapter`] if `adapter.close` fails.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let mut slot = global_slot().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            return Err(ServiceError::NotInitialized);
        }
        self.adapter.close().await?;
        *slot = None;
        Ok(())
    }
}
