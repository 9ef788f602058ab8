mod connection;
pub mod protocol;
mod registry;
mod socket;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use self::protocol::OutboundEvent;
use crate::services::Services;

pub use connection::{LiveConnection, LiveError};
pub use registry::{LiveRegistry, LiveSummary, RegistryError};
pub(crate) use socket::{live_socket, live_socket_for_session};

/// Hands out per-socket [`LiveConnection`]s that share the services and the registry.
#[derive(Clone)]
pub struct LiveSessionManager {
    services: Arc<Services>,
    registry: LiveRegistry,
    next_connection_id: Arc<AtomicU64>,
}

impl LiveSessionManager {
    pub fn new(services: Arc<Services>, registry: LiveRegistry) -> Self {
        Self {
            services,
            registry,
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn registry(&self) -> &LiveRegistry {
        &self.registry
    }

    pub fn connect(
        &self,
        requested_session_id: Option<String>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> LiveConnection {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        LiveConnection::new(
            self.services.clone(),
            self.registry.clone(),
            connection_id,
            requested_session_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            outbound,
        )
    }
}
