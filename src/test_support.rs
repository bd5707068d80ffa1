use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::SubgraphConfig;
use crate::composition::{Supergraph, SubgraphDescriptor, compose};
use crate::error::CompositionError;
use crate::introspector::SchemaIntrospector;
use crate::schema_registry::SchemaRegistry;

pub(crate) const PRODUCTS_SDL: &str = r#"
type Query {
  product(id: ID!): Product
  products: [Product!]!
  topProduct: Product!
}

type Mutation {
  createProduct(name: String!): Product!
}

type Product @key(fields: "id") {
  id: ID!
  name: String!
  price: Float
}
"#;

pub(crate) const IMAGES_SDL: &str = r#"
type Query {
  images: [Image!]!
}

type Mutation {
  uploadImage(url: String!): Image!
}

type Image @key(fields: "url") {
  url: String!
  alt: String
}

type Product @key(fields: "id") {
  id: ID!
  image: String
  thumbnail: Image!
}
"#;

pub(crate) fn descriptor(name: &str, sdl: &str) -> SubgraphDescriptor {
    SubgraphDescriptor::parse(name, &format!("http://{name}/graphql"), sdl).unwrap()
}

pub(crate) fn products_and_images() -> Supergraph {
    compose(&[descriptor("products", PRODUCTS_SDL), descriptor("images", IMAGES_SDL)]).unwrap()
}

/// Serves whatever SDL was last `set` for a subgraph; unknown subgraphs are
/// unreachable.
#[derive(Default)]
pub(crate) struct FakeIntrospector {
    sdls: Mutex<HashMap<String, String>>,
}

impl FakeIntrospector {
    pub(crate) fn set(&self, name: &str, sdl: &str) {
        self.sdls.lock().unwrap().insert(name.to_string(), sdl.to_string());
    }
}

#[async_trait]
impl SchemaIntrospector for Arc<FakeIntrospector> {
    async fn fetch_sdl(&self, subgraph: &SubgraphConfig) -> Result<String, CompositionError> {
        self.sdls
            .lock()
            .unwrap()
            .get(&subgraph.name)
            .cloned()
            .ok_or_else(|| CompositionError::Introspection {
                subgraph: subgraph.name.clone(),
                reason: "connection refused".into(),
            })
    }
}

/// A registry over products and images backed by a [`FakeIntrospector`].
pub(crate) fn fake_registry() -> (SchemaRegistry, Arc<FakeIntrospector>) {
    let introspector = Arc::new(FakeIntrospector::default());
    introspector.set("products", PRODUCTS_SDL);
    introspector.set("images", IMAGES_SDL);
    let registry = SchemaRegistry::new(
        vec![
            SubgraphConfig::new("products", "http://products/graphql"),
            SubgraphConfig::new("images", "http://images/graphql"),
        ],
        Box::new(Arc::clone(&introspector)),
    );
    (registry, introspector)
}
