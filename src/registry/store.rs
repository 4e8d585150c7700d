//! Registry implementations
//!
//! `ClientRegistry` tracks named sessions; `VideoSubscribers` tracks
//! membership only. Both are `std::sync::Mutex`-guarded so the stream
//! worker threads and the cooperative scheduler can share them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use super::handle::{OutboundHandle, SessionId};

/// A registered named session
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    /// Assigned logical name (unique within this registry)
    pub name: String,

    /// Outbound delivery handle
    pub handle: OutboundHandle,

    /// When the session registered
    pub connected_at: Instant,
}

/// Thread-safe mapping of session id to named client
///
/// Registration is atomic with the uniqueness check: if the proposed
/// name is held by a live session, a numeric suffix is appended until
/// unique (`name`, `name_1`, `name_2`, ...).
pub struct ClientRegistry {
    /// Registry label used in log fields ("stream", "control")
    label: &'static str,

    clients: Mutex<HashMap<SessionId, RegisteredClient>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session under a proposed name, returning the name
    /// actually assigned
    pub fn register(
        &self,
        id: SessionId,
        handle: OutboundHandle,
        proposed_name: &str,
    ) -> String {
        let mut clients = self.clients.lock().unwrap();

        let mut assigned = proposed_name.to_string();
        let mut suffix = 0u32;
        while clients.values().any(|c| c.name == assigned) {
            suffix += 1;
            assigned = format!("{proposed_name}_{suffix}");
        }

        clients.insert(
            id,
            RegisteredClient {
                name: assigned.clone(),
                handle,
                connected_at: Instant::now(),
            },
        );

        if assigned != proposed_name {
            tracing::info!(
                registry = self.label,
                session_id = id,
                proposed = proposed_name,
                assigned = %assigned,
                "Name taken, assigned suffixed name"
            );
        } else {
            tracing::info!(
                registry = self.label,
                session_id = id,
                client = %assigned,
                "Client registered"
            );
        }

        assigned
    }

    /// Remove a session, returning its entry if it was registered
    pub fn unregister(&self, id: SessionId) -> Option<RegisteredClient> {
        let removed = self.clients.lock().unwrap().remove(&id);

        if let Some(ref client) = removed {
            tracing::info!(
                registry = self.label,
                session_id = id,
                client = %client.name,
                "Client unregistered"
            );
        }

        removed
    }

    /// Look up a live session by its assigned name
    pub fn lookup_by_name(&self, name: &str) -> Option<(SessionId, OutboundHandle)> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, c)| (*id, c.handle.clone()))
    }

    /// Snapshot of every live session
    pub fn all(&self) -> Vec<(SessionId, String, OutboundHandle)> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .map(|(id, c)| (*id, c.name.clone(), c.handle.clone()))
            .collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The duplex video-subscriber set
///
/// Membership only: video sessions have no names and never route.
pub struct VideoSubscribers {
    subscribers: Mutex<HashMap<SessionId, OutboundHandle>>,
}

impl VideoSubscribers {
    /// Create an empty subscriber set
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Add a subscriber
    pub fn register(&self, id: SessionId, handle: OutboundHandle) {
        self.subscribers.lock().unwrap().insert(id, handle);
        tracing::info!(session_id = id, "Video subscriber added");
    }

    /// Remove a subscriber
    pub fn unregister(&self, id: SessionId) {
        if self.subscribers.lock().unwrap().remove(&id).is_some() {
            tracing::info!(session_id = id, "Video subscriber removed");
        }
    }

    /// Snapshot of the current subscriber set
    pub fn snapshot(&self) -> Vec<(SessionId, OutboundHandle)> {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect()
    }

    /// Number of subscribers
    pub fn len(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Whether anyone is watching
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VideoSubscribers {
    fn default() -> Self {
        Self::new()
    }
}
