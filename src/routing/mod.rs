//! Control message routing
//!
//! The routing table maps a sender's logical name to an ordered set of
//! target names; `*` fans out to every live duplex control session
//! except the sender. The engine resolves each target against the
//! stream registry first, then the control registry, and delivers to
//! the first match. Routing is fire-and-forget: a dead target is
//! evicted from its registry and the remaining targets still get the
//! message.
//!
//! The engine is callable from both concurrency domains; delivery is a
//! channel push into the target session's writer (see
//! [`crate::registry`]), never a direct socket write.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::protocol::envelope::ControlMessage;
use crate::registry::{ClientRegistry, SessionId, SessionKind};
use crate::stats::RelayCounters;

/// Target name that fans out to all duplex control sessions
pub const WILDCARD: &str = "*";

/// Mapping from sender name to target names
///
/// Loaded at startup, mutable at runtime, never persisted.
pub struct RoutingTable {
    routes: Mutex<HashMap<String, Vec<String>>>,
}

impl RoutingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Create a table seeded with the reference deployment's policy
    pub fn with_defaults() -> Self {
        let table = Self::new();
        table.add_route("ESP_Matrix", ["Web"]);
        table.add_route("Web", ["RobotArm"]);
        table.add_route("ESP_Boolean", ["Web", "RobotArm"]);
        table.add_route("ESP_Sensor", ["Web"]);
        table.add_route("RobotArm", ["Web"]);
        table.add_route("admin", [WILDCARD]);
        table
    }

    /// Set the targets for a sender, replacing any existing entry
    pub fn add_route<I, S>(&self, sender: &str, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        self.routes
            .lock()
            .unwrap()
            .insert(sender.to_string(), targets);
    }

    /// Remove a sender's entry, returning its former targets
    pub fn remove_route(&self, sender: &str) -> Option<Vec<String>> {
        self.routes.lock().unwrap().remove(sender)
    }

    /// Resolve a sender's targets
    ///
    /// A wildcard anywhere in the list collapses it to just the
    /// wildcard; everything else would be delivered twice.
    pub fn targets_for(&self, sender: &str) -> Vec<String> {
        let routes = self.routes.lock().unwrap();
        let targets = routes.get(sender).cloned().unwrap_or_default();

        if targets.iter().any(|t| t == WILDCARD) {
            vec![WILDCARD.to_string()]
        } else {
            targets
        }
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivers control messages between named clients
pub struct RoutingEngine {
    table: Arc<RoutingTable>,
    stream_registry: Arc<ClientRegistry>,
    control_registry: Arc<ClientRegistry>,
    counters: Arc<RelayCounters>,
}

impl RoutingEngine {
    /// Wire up an engine over the shared table and registries
    pub fn new(
        table: Arc<RoutingTable>,
        stream_registry: Arc<ClientRegistry>,
        control_registry: Arc<ClientRegistry>,
        counters: Arc<RelayCounters>,
    ) -> Self {
        Self {
            table,
            stream_registry,
            control_registry,
            counters,
        }
    }

    /// Route one message from a named sender
    ///
    /// No configured targets is a policy outcome, not an error: the
    /// message is dropped with a diagnostic log.
    pub fn route(
        &self,
        mut message: ControlMessage,
        sender_name: &str,
        sender_id: SessionId,
        sender_kind: SessionKind,
    ) {
        let targets = self.table.targets_for(sender_name);
        if targets.is_empty() {
            tracing::debug!(
                sender = sender_name,
                kind = sender_kind.label(),
                "No routing targets, dropping message"
            );
            return;
        }

        message.stamp_sender(sender_name);
        let payload = message.to_bytes();

        tracing::debug!(
            sender = sender_name,
            kind = sender_kind.label(),
            targets = ?targets,
            "Routing message"
        );

        for target in &targets {
            if target == WILDCARD {
                self.deliver_wildcard(&payload, sender_id);
            } else {
                self.deliver_named(target, &payload);
            }
        }
    }

    /// Deliver to every duplex control session except the sender
    fn deliver_wildcard(&self, payload: &bytes::Bytes, sender_id: SessionId) {
        for (id, name, handle) in self.control_registry.all() {
            if id == sender_id {
                continue;
            }
            if handle.send(payload.clone()).is_ok() {
                self.counters.record_message_routed();
            } else {
                tracing::warn!(client = %name, "Delivery failed, removing control client");
                self.counters.record_route_failure();
                self.control_registry.unregister(id);
            }
        }
    }

    /// Deliver to the first registry holding the target name
    fn deliver_named(&self, target: &str, payload: &bytes::Bytes) {
        if let Some((id, handle)) = self.stream_registry.lookup_by_name(target) {
            if handle.send(payload.clone()).is_ok() {
                self.counters.record_message_routed();
            } else {
                tracing::warn!(client = target, "Delivery failed, removing stream client");
                self.counters.record_route_failure();
                self.stream_registry.unregister(id);
            }
            return;
        }

        if let Some((id, handle)) = self.control_registry.lookup_by_name(target) {
            if handle.send(payload.clone()).is_ok() {
                self.counters.record_message_routed();
            } else {
                tracing::warn!(client = target, "Delivery failed, removing control client");
                self.counters.record_route_failure();
                self.control_registry.unregister(id);
            }
            return;
        }

        tracing::debug!(target, "Routing target not connected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::Value;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    use crate::registry::OutboundHandle;

    struct Harness {
        table: Arc<RoutingTable>,
        stream: Arc<ClientRegistry>,
        control: Arc<ClientRegistry>,
        counters: Arc<RelayCounters>,
        engine: RoutingEngine,
    }

    impl Harness {
        fn new() -> Self {
            let table = Arc::new(RoutingTable::new());
            let stream = Arc::new(ClientRegistry::new("stream"));
            let control = Arc::new(ClientRegistry::new("control"));
            let counters = Arc::new(RelayCounters::new());
            let engine = RoutingEngine::new(
                Arc::clone(&table),
                Arc::clone(&stream),
                Arc::clone(&control),
                Arc::clone(&counters),
            );
            Self {
                table,
                stream,
                control,
                counters,
                engine,
            }
        }

        fn add_control(&self, id: SessionId, name: &str) -> UnboundedReceiver<Bytes> {
            let (tx, rx) = unbounded_channel();
            self.control.register(id, OutboundHandle::Duplex(tx), name);
            rx
        }

        fn add_stream(&self, id: SessionId, name: &str) -> std::sync::mpsc::Receiver<Bytes> {
            let (tx, rx) = std::sync::mpsc::channel();
            self.stream.register(id, OutboundHandle::Stream(tx), name);
            rx
        }
    }

    fn command(value: bool) -> ControlMessage {
        ControlMessage::parse(
            format!(r#"{{"type":"command","value":{value}}}"#).as_bytes(),
        )
        .unwrap()
    }

    fn parse(payload: Bytes) -> Value {
        serde_json::from_slice(&payload).unwrap()
    }

    #[test]
    fn test_named_route_stamps_sender() {
        let h = Harness::new();
        h.table.add_route("RobotArm", ["Web"]);
        let sender_rx = h.add_control(1, "RobotArm");
        let mut web_rx = h.add_control(2, "Web");

        h.engine
            .route(command(true), "RobotArm", 1, SessionKind::DuplexControl);

        let value = parse(web_rx.try_recv().unwrap());
        assert_eq!(value["type"], "command");
        assert_eq!(value["value"], true);
        assert_eq!(value["sender"], "RobotArm");
        drop(sender_rx);
    }

    #[test]
    fn test_wildcard_reaches_all_control_except_sender() {
        let h = Harness::new();
        h.table.add_route("admin", [WILDCARD]);
        let mut admin_rx = h.add_control(1, "admin");
        let mut a_rx = h.add_control(2, "a");
        let mut b_rx = h.add_control(3, "b");
        let stream_rx = h.add_stream(4, "s");

        h.engine
            .route(command(false), "admin", 1, SessionKind::DuplexControl);

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
        assert!(admin_rx.try_recv().is_err(), "sender must not receive");
        assert!(
            stream_rx.try_recv().is_err(),
            "wildcard must not reach stream sessions"
        );
    }

    #[test]
    fn test_wildcard_collapses_other_targets() {
        let h = Harness::new();
        h.table.add_route("admin", ["a", WILDCARD]);
        let mut a_rx = h.add_control(2, "a");

        h.engine
            .route(command(true), "admin", 1, SessionKind::DuplexControl);

        // Exactly one copy despite being named and matched by wildcard
        assert!(a_rx.try_recv().is_ok());
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_no_targets_is_a_noop() {
        let h = Harness::new();
        let mut web_rx = h.add_control(1, "Web");

        h.engine
            .route(command(true), "Unrouted", 2, SessionKind::Stream);

        assert!(web_rx.try_recv().is_err());
        assert_eq!(h.counters.snapshot().messages_routed, 0);
    }

    #[test]
    fn test_stream_registry_takes_precedence() {
        let h = Harness::new();
        h.table.add_route("Sensor", ["Web"]);
        let stream_rx = h.add_stream(1, "Web");
        let mut control_rx = h.add_control(2, "Web");

        h.engine
            .route(command(true), "Sensor", 3, SessionKind::Stream);

        assert!(stream_rx.try_recv().is_ok());
        assert!(control_rx.try_recv().is_err());
    }

    #[test]
    fn test_dead_target_evicted_without_aborting_delivery() {
        let h = Harness::new();
        h.table.add_route("Sensor", ["dead", "alive"]);

        let (dead_tx, dead_rx) = unbounded_channel();
        drop(dead_rx);
        h.control.register(1, OutboundHandle::Duplex(dead_tx), "dead");
        let mut alive_rx = h.add_control(2, "alive");

        h.engine
            .route(command(true), "Sensor", 3, SessionKind::Stream);

        assert!(alive_rx.try_recv().is_ok(), "later targets still served");
        assert!(h.control.lookup_by_name("dead").is_none(), "dead target evicted");
        assert_eq!(h.counters.snapshot().route_failures, 1);
        assert_eq!(h.counters.snapshot().messages_routed, 1);
    }

    #[test]
    fn test_runtime_route_mutation() {
        let h = Harness::new();
        h.table.add_route("a", ["b"]);
        assert_eq!(h.table.targets_for("a"), vec!["b".to_string()]);

        h.table.add_route("a", ["c"]);
        assert_eq!(h.table.targets_for("a"), vec!["c".to_string()]);

        assert_eq!(h.table.remove_route("a"), Some(vec!["c".to_string()]));
        assert!(h.table.targets_for("a").is_empty());
    }

    #[test]
    fn test_default_table_matches_reference_policy() {
        let table = RoutingTable::with_defaults();

        assert_eq!(table.targets_for("RobotArm"), vec!["Web".to_string()]);
        assert_eq!(
            table.targets_for("ESP_Boolean"),
            vec!["Web".to_string(), "RobotArm".to_string()]
        );
        assert_eq!(table.targets_for("admin"), vec![WILDCARD.to_string()]);
    }
}
