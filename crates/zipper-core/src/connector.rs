//! Concurrent registry of live logical connections.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use zipper_proto::Tag;

use crate::connection::{ClientType, ConnId, Connection};

/// Maps connection ids to live logical connections.
///
/// # Invariants
///
/// - Reads are safe under concurrent add/remove.
/// - [`Connector::remove`] is idempotent.
/// - [`Connector::clean`] terminates every connection and empties the map.
///
/// Writes *into* a connection are serialized by the connection's own
/// writer; the connector only guards the map.
#[derive(Clone, Default)]
pub struct Connector {
    inner: Arc<Mutex<HashMap<ConnId, Arc<Connection>>>>,
}

impl Connector {
    /// Create an empty connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `conn_id`, replacing any prior entry.
    pub fn add(&self, conn_id: impl Into<ConnId>, conn: Arc<Connection>) {
        self.lock().insert(conn_id.into(), conn);
    }

    /// Look up a connection.
    #[must_use]
    pub fn get(&self, conn_id: &str) -> Option<Arc<Connection>> {
        self.lock().get(conn_id).cloned()
    }

    /// Drop a connection from the registry. Removing an absent id is a
    /// no-op.
    pub fn remove(&self, conn_id: &str) {
        self.lock().remove(conn_id);
    }

    /// Copy of the registry as `conn_id -> client name`.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<ConnId, String> {
        self.lock().iter().map(|(id, conn)| (id.clone(), conn.name().to_string())).collect()
    }

    /// Sources with the given client id that observe `tag`.
    ///
    /// Backflow results are fanned out to exactly these connections.
    #[must_use]
    pub fn source_conns(&self, source_id: &str, tag: Tag) -> Vec<Arc<Connection>> {
        self.lock()
            .values()
            .filter(|conn| {
                conn.client_type() == ClientType::Source
                    && conn.client_id() == source_id
                    && conn.observes(tag)
            })
            .cloned()
            .collect()
    }

    /// Terminate every connection and empty the registry.
    pub async fn clean(&self) {
        let conns: Vec<Arc<Connection>> = self.lock().drain().map(|(_, conn)| conn).collect();
        for conn in conns {
            conn.close().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnId, Arc<Connection>>> {
        self.inner.lock().expect("connector mutex poisoned")
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").field("connections", &self.lock().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(name: &str, client_id: &str, client_type: ClientType, tags: Vec<Tag>) -> Arc<Connection> {
        Arc::new(Connection::new(
            name.to_string(),
            client_id.to_string(),
            client_type,
            None,
            tags,
            Box::new(tokio::io::sink()),
        ))
    }

    #[test]
    fn add_get_remove() {
        let connector = Connector::new();
        connector.add("conn-1", conn("s1", "c1", ClientType::Source, vec![]));

        assert_eq!(connector.get("conn-1").unwrap().name(), "s1");
        assert!(connector.get("conn-2").is_none());

        connector.remove("conn-1");
        assert!(connector.get("conn-1").is_none());

        // idempotent
        connector.remove("conn-1");
    }

    #[test]
    fn snapshot_maps_ids_to_names() {
        let connector = Connector::new();
        connector.add("conn-1", conn("s1", "c1", ClientType::Source, vec![]));
        connector.add("conn-2", conn("f1", "c2", ClientType::StreamFunction, vec![1]));

        let snapshot = connector.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["conn-1"], "s1");
        assert_eq!(snapshot["conn-2"], "f1");
    }

    #[test]
    fn source_conns_filters_by_id_type_and_tag() {
        let connector = Connector::new();
        connector.add("conn-1", conn("s1", "source-a", ClientType::Source, vec![0x7]));
        connector.add("conn-2", conn("s2", "source-a", ClientType::Source, vec![0x8]));
        connector.add("conn-3", conn("s3", "source-b", ClientType::Source, vec![0x7]));
        connector.add("conn-4", conn("f1", "source-a", ClientType::StreamFunction, vec![0x7]));

        let matched = connector.source_conns("source-a", 0x7);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name(), "s1");
    }

    #[test]
    fn concurrent_access_is_safe() {
        let connector = Connector::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let connector = connector.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let id = format!("conn-{i}-{j}");
                        connector.add(
                            id.clone(),
                            conn("w", "c", ClientType::Source, vec![]),
                        );
                        assert!(connector.get(&id).is_some());
                        let _ = connector.snapshot();
                        connector.remove(&id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(connector.snapshot().is_empty());
    }

    #[tokio::test]
    async fn clean_terminates_and_empties() {
        let connector = Connector::new();
        let c1 = conn("s1", "c1", ClientType::Source, vec![]);
        connector.add("conn-1", Arc::clone(&c1));

        connector.clean().await;
        assert!(connector.snapshot().is_empty());
        assert!(c1.is_closed());
    }
}
