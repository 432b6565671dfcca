use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::core::persona::{FilePersonaStore, PersonaResolver, PersonaStore};
use crate::core::realtime::{SharedConnector, create_connector};
use crate::core::relay::RelayEngine;
use crate::core::router::CallRouter;

/// Why a new media stream connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Application state shared by every handler
pub struct AppState {
    pub config: ServerConfig,
    pub personas: Arc<dyn PersonaStore>,
    pub engine: RelayEngine,

    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
    active_calls: AtomicUsize,
}

impl AppState {
    /// Build state from configuration, loading personas from disk and
    /// creating the upstream connector.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let store: Arc<dyn PersonaStore> = Arc::new(FilePersonaStore::open(config.personas_dir.clone()));
        let connector = create_connector(&config);
        Self::with_parts(config, store, connector)
    }

    /// Build state from explicit parts. Used by tests to inject an in-memory
    /// persona store or a stub upstream.
    pub fn with_parts(
        config: ServerConfig,
        personas: Arc<dyn PersonaStore>,
        connector: SharedConnector,
    ) -> Arc<Self> {
        let resolver = Arc::new(PersonaResolver::new(
            personas.clone(),
            config.persona_defaults(),
        ));
        let router = Arc::new(CallRouter::new(&config.routes, &config.default_bot));
        let engine = RelayEngine::new(connector, resolver, router, config.relay_config());

        tracing::info!(
            personas = personas.len(),
            routes = config.routes.len(),
            default_bot = %config.default_bot,
            "Application state initialised"
        );

        Arc::new(Self {
            config,
            personas,
            engine,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
            active_calls: AtomicUsize::new(0),
        })
    }

    /// Reserve a connection slot for `ip`.
    ///
    /// The per-IP limit is checked before the global one. On success the
    /// caller must eventually call [`release_connection`].
    ///
    /// [`release_connection`]: AppState::release_connection
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let per_ip_limit = self.config.max_connections_per_ip as usize;
        let mut ip_count = self.ip_connections.entry(ip).or_insert(0);
        if *ip_count >= per_ip_limit {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        if let Some(max) = self.config.max_websocket_connections {
            let acquired = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                });
            if acquired.is_err() {
                drop(ip_count);
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        *ip_count += 1;
        Ok(())
    }

    /// Return a slot taken by [`try_acquire_connection`].
    ///
    /// [`try_acquire_connection`]: AppState::try_acquire_connection
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });

        let remove = match self.ip_connections.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if remove {
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }

    /// Calls currently inside the relay engine
    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::Acquire)
    }

    pub(crate) fn call_started(&self) {
        self.active_calls.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn call_ended(&self) {
        let _ = self
            .active_calls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }
}
