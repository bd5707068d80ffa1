pub mod composition;
pub mod config;
pub mod error;
pub mod federation_gateway;
pub mod introspector;
pub mod query_executor;
pub mod query_planner;
pub mod schema_registry;
pub mod server;

#[cfg(test)]
mod test_support;

pub use composition::{Supergraph, compose};
pub use federation_gateway::FederationGateway;
pub use introspector::HttpSchemaIntrospector;
pub use query_executor::HttpQueryExecutor;
pub use query_planner::FederatedQueryPlanner;
pub use schema_registry::{SchemaRegistry, SupergraphHandle};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A subgraph as configured by the operator: where to reach it and,
/// optionally, a static SDL that replaces introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdl: Option<String>,
}

impl SubgraphConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        SubgraphConfig {
            name: name.into(),
            url: url.into(),
            sdl: None,
        }
    }

    pub fn with_sdl(mut self, sdl: impl Into<String>) -> Self {
        self.sdl = Some(sdl.into());
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// One step of a response path: an object key or a list index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

pub type ResponsePath = Vec<PathSegment>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ResponsePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: ResponsePath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_extension(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn with_code(self, code: &str) -> Self {
        self.with_extension("code", code)
    }

    /// True when this error sits at `path` or somewhere below it.
    pub fn is_within(&self, path: &[PathSegment]) -> bool {
        self.path
            .as_deref()
            .is_some_and(|own| own.len() >= path.len() && own[..path.len()] == *path)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl GraphQLResponse {
    pub fn from_error(error: GraphQLError) -> Self {
        GraphQLResponse {
            data: None,
            errors: vec![error],
            extensions: Map::new(),
        }
    }
}
