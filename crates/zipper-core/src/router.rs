//! Routing of data frames to stream functions.
//!
//! A [`Router`] resolves metadata to a [`Route`]; a route maintains the
//! set of stream function endpoints indexed by the data tags they observe.
//! Routes outlive individual stream functions but never reference a dead
//! connection: whatever removes a connection from the connector also
//! removes it from its route.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use zipper_proto::Tag;

use crate::{connection::ConnId, metadata::Metadata};

/// Route-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// An entry with the same stream function name is already present.
    /// Carries the connection id of the existing holder so the server can
    /// evict it.
    #[error("stream function name {name} already connected as {conn_id}")]
    DuplicateName {
        /// The colliding stream function name.
        name: String,
        /// Connection id of the prior holder.
        conn_id: ConnId,
    },
}

/// Resolves routing metadata to a route.
pub trait Router: Send + Sync + 'static {
    /// The route serving `metadata`, or `None` when nothing routes it.
    fn route(&self, metadata: Option<&dyn Metadata>) -> Option<Arc<dyn Route>>;

    /// Drop all routing state.
    fn clean(&self);
}

/// Set of stream function endpoints for one metadata key.
///
/// # Invariants
///
/// - Within one route, stream function names are unique.
/// - [`Route::forward_routes`] returns a copied snapshot, so concurrent
///   removals during iteration cannot corrupt a dispatch in progress.
pub trait Route: Send + Sync + 'static {
    /// Add a stream function endpoint.
    ///
    /// On a name collision the route keeps **only the new entry** and
    /// returns [`RouterError::DuplicateName`] naming the prior holder,
    /// which the server then evicts with a goaway.
    ///
    /// # Errors
    ///
    /// [`RouterError::DuplicateName`] as described above.
    fn add(&self, conn_id: ConnId, name: &str, observed: &[Tag]) -> Result<(), RouterError>;

    /// Remove an endpoint. Removing an absent id is a no-op.
    fn remove(&self, conn_id: &str);

    /// Connection ids of every endpoint observing `tag`. Order is
    /// unspecified.
    fn forward_routes(&self, tag: Tag) -> Vec<ConnId>;
}

#[derive(Debug, Clone)]
struct RouteEntry {
    name: String,
    observed: Vec<Tag>,
}

/// Route keeping its endpoints in one flat map.
#[derive(Default)]
pub struct DefaultRoute {
    entries: Mutex<HashMap<ConnId, RouteEntry>>,
}

impl DefaultRoute {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnId, RouteEntry>> {
        self.entries.lock().expect("route mutex poisoned")
    }

    fn clean(&self) {
        self.lock().clear();
    }
}

impl Route for DefaultRoute {
    fn add(&self, conn_id: ConnId, name: &str, observed: &[Tag]) -> Result<(), RouterError> {
        let mut entries = self.lock();
        let prior = entries
            .iter()
            .find(|(id, entry)| entry.name == name && **id != conn_id)
            .map(|(id, _)| id.clone());

        let entry = RouteEntry { name: name.to_string(), observed: observed.to_vec() };
        entries.insert(conn_id, entry);

        match prior {
            Some(prior_id) => {
                entries.remove(&prior_id);
                Err(RouterError::DuplicateName { name: name.to_string(), conn_id: prior_id })
            }
            None => Ok(()),
        }
    }

    fn remove(&self, conn_id: &str) {
        self.lock().remove(conn_id);
    }

    fn forward_routes(&self, tag: Tag) -> Vec<ConnId> {
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.observed.contains(&tag))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Router for single-tenant deployments: every metadata key resolves to
/// the same shared route.
#[derive(Default)]
pub struct DefaultRouter {
    route: Arc<DefaultRoute>,
}

impl DefaultRouter {
    /// Create a router with one empty route.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Router for DefaultRouter {
    fn route(&self, _metadata: Option<&dyn Metadata>) -> Option<Arc<dyn Route>> {
        let route: Arc<DefaultRoute> = Arc::clone(&self.route);
        let route: Arc<dyn Route> = route;
        Some(route)
    }

    fn clean(&self) {
        self.route.clean();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_routes_matches_observed_tags() {
        let route = DefaultRoute::default();
        route.add("conn-1".to_string(), "f1", &[0x7, 0x8]).unwrap();
        route.add("conn-2".to_string(), "f2", &[0x7]).unwrap();
        route.add("conn-3".to_string(), "f3", &[0x9]).unwrap();

        let mut targets = route.forward_routes(0x7);
        targets.sort();
        assert_eq!(targets, vec!["conn-1", "conn-2"]);
        assert!(route.forward_routes(0x42).is_empty());
    }

    #[test]
    fn duplicate_name_keeps_only_the_new_entry() {
        let route = DefaultRoute::default();
        route.add("conn-1".to_string(), "f1", &[0x7]).unwrap();

        let err = route.add("conn-2".to_string(), "f1", &[0x7]).unwrap_err();
        assert_eq!(
            err,
            RouterError::DuplicateName { name: "f1".to_string(), conn_id: "conn-1".to_string() }
        );
        assert_eq!(route.forward_routes(0x7), vec!["conn-2"]);
    }

    #[test]
    fn re_adding_the_same_connection_is_not_a_collision() {
        let route = DefaultRoute::default();
        route.add("conn-1".to_string(), "f1", &[0x7]).unwrap();
        route.add("conn-1".to_string(), "f1", &[0x7, 0x8]).unwrap();
        assert_eq!(route.forward_routes(0x8), vec!["conn-1"]);
    }

    #[test]
    fn names_stay_unique_under_churn() {
        let route = DefaultRoute::default();
        for round in 0..10 {
            let _ = route.add(format!("conn-{round}"), "worker", &[0x1]);
        }
        // Only the latest holder remains.
        assert_eq!(route.forward_routes(0x1), vec!["conn-9"]);
    }

    #[test]
    fn remove_is_idempotent() {
        let route = DefaultRoute::default();
        route.add("conn-1".to_string(), "f1", &[0x7]).unwrap();
        route.remove("conn-1");
        route.remove("conn-1");
        assert!(route.forward_routes(0x7).is_empty());
    }

    #[test]
    fn default_router_shares_one_route() {
        let router = DefaultRouter::new();
        let route = router.route(None).unwrap();
        route.add("conn-1".to_string(), "f1", &[0x7]).unwrap();

        let again = router.route(None).unwrap();
        assert_eq!(again.forward_routes(0x7), vec!["conn-1"]);

        router.clean();
        assert!(router.route(None).unwrap().forward_routes(0x7).is_empty());
    }
}
