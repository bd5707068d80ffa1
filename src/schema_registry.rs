use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::SubgraphConfig;
use crate::composition::{Supergraph, SubgraphDescriptor, compose};
use crate::error::CompositionError;
use crate::introspector::SchemaIntrospector;

/// The supergraph every request plans against.
///
/// Readers clone the `Arc` and let go of the lock, so a recomposition swaps
/// the whole supergraph without waiting on in-flight requests, and no
/// reader ever sees half of an update.
#[derive(Debug, Default)]
pub struct SupergraphHandle {
    current: RwLock<Option<Arc<Supergraph>>>,
}

impl SupergraphHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self) -> Option<Arc<Supergraph>> {
        self.current.read().await.clone()
    }

    /// Installs `supergraph`, returning the one it replaces.
    pub async fn replace(&self, supergraph: Supergraph) -> Option<Arc<Supergraph>> {
        self.current.write().await.replace(Arc::new(supergraph))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomposeOutcome {
    Updated,
    Unchanged,
}

/// Owns the subgraph list and turns it into supergraphs.
pub struct SchemaRegistry {
    subgraphs: RwLock<Vec<SubgraphConfig>>,
    introspector: Box<dyn SchemaIntrospector>,
    handle: Arc<SupergraphHandle>,
    compose_lock: Mutex<()>,
}

impl SchemaRegistry {
    pub fn new(subgraphs: Vec<SubgraphConfig>, introspector: Box<dyn SchemaIntrospector>) -> Self {
        SchemaRegistry {
            subgraphs: RwLock::new(subgraphs),
            introspector,
            handle: Arc::new(SupergraphHandle::new()),
            compose_lock: Mutex::new(()),
        }
    }

    pub fn handle(&self) -> Arc<SupergraphHandle> {
        Arc::clone(&self.handle)
    }

    pub async fn subgraphs(&self) -> Vec<SubgraphConfig> {
        self.subgraphs.read().await.clone()
    }

    /// Adds a subgraph, or replaces the one with the same name. Takes effect
    /// on the next [`recompose`](Self::recompose).
    pub async fn register_subgraph(&self, subgraph: SubgraphConfig) {
        let mut subgraphs = self.subgraphs.write().await;
        match subgraphs.iter_mut().find(|existing| existing.name == subgraph.name) {
            Some(existing) => *existing = subgraph,
            None => subgraphs.push(subgraph),
        }
    }

    /// Fetches every subgraph schema and composes them. The current
    /// supergraph is only replaced when composition succeeds.
    pub async fn recompose(&self) -> Result<RecomposeOutcome, CompositionError> {
        let _guard = self.compose_lock.lock().await;
        let subgraphs = self.subgraphs().await;

        let fetches = subgraphs.iter().map(|subgraph| self.introspector.fetch_sdl(subgraph));
        let sdls = join_all(fetches).await;
        let mut descriptors = Vec::with_capacity(subgraphs.len());
        for (subgraph, sdl) in subgraphs.iter().zip(sdls) {
            let sdl = sdl?;
            descriptors.push(SubgraphDescriptor::parse(&subgraph.name, &subgraph.url, &sdl)?);
        }
        let supergraph = compose(&descriptors)?;

        if self
            .handle
            .load()
            .await
            .is_some_and(|current| *current == supergraph)
        {
            return Ok(RecomposeOutcome::Unchanged);
        }
        self.handle.replace(supergraph).await;
        info!(subgraphs = descriptors.len(), "supergraph updated");
        Ok(RecomposeOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fake_registry;

    #[tokio::test]
    async fn recompose_installs_and_then_keeps_the_supergraph() {
        let (registry, _) = fake_registry();
        let handle = registry.handle();
        assert!(handle.load().await.is_none());

        assert_eq!(registry.recompose().await.unwrap(), RecomposeOutcome::Updated);
        let first = handle.load().await.unwrap();
        assert!(first.field("Product", "image").is_some());

        assert_eq!(registry.recompose().await.unwrap(), RecomposeOutcome::Unchanged);
        assert!(Arc::ptr_eq(&first, &handle.load().await.unwrap()));
    }

    #[tokio::test]
    async fn failed_recomposition_keeps_the_last_good_supergraph() {
        let (registry, introspector) = fake_registry();
        registry.recompose().await.unwrap();

        introspector.set("images", "type Product @key(fields: \"id\") { id: String! }");
        let error = registry.recompose().await.unwrap_err();
        assert!(matches!(error, CompositionError::Conflicts(_)), "{error}");

        let current = registry.handle().load().await.unwrap();
        assert!(current.field("Product", "image").is_some());
    }

    #[tokio::test]
    async fn registering_a_subgraph_replaces_it_by_name() {
        let (registry, introspector) = fake_registry();
        introspector.set("reviews", "type Query { reviews: [String!]! }");
        registry
            .register_subgraph(SubgraphConfig::new("images", "http://images-v2/graphql"))
            .await;
        registry
            .register_subgraph(SubgraphConfig::new("reviews", "http://reviews/graphql"))
            .await;

        registry.recompose().await.unwrap();
        let supergraph = registry.handle().load().await.unwrap();
        assert_eq!(supergraph.subgraph_url("images"), Some("http://images-v2/graphql"));
        assert!(supergraph.field("Query", "reviews").is_some());
        assert_eq!(registry.subgraphs().await.len(), 3);
    }

    #[tokio::test]
    async fn unreachable_subgraphs_fail_composition() {
        let (registry, _) = fake_registry();
        registry
            .register_subgraph(SubgraphConfig::new("offline", "http://offline/graphql"))
            .await;

        let error = registry.recompose().await.unwrap_err();
        assert!(matches!(error, CompositionError::Introspection { .. }), "{error}");
    }
}
