use std::path::PathBuf;

use thiserror::Error;

use crate::{GraphQLError, ResponsePath};

/// Failures while building a supergraph. The gateway keeps serving the last
/// good supergraph when a recomposition fails with one of these.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("no subgraphs configured")]
    NoSubgraphs,

    #[error("subgraph `{0}` is configured more than once")]
    DuplicateSubgraph(String),

    #[error("could not fetch the schema of subgraph `{subgraph}`: {reason}")]
    Introspection { subgraph: String, reason: String },

    #[error("invalid schema for subgraph `{subgraph}`: {reason}")]
    InvalidSchema { subgraph: String, reason: String },

    #[error("composition failed:\n  - {}", .0.join("\n  - "))]
    Conflicts(Vec<String>),
}

/// Per-request failures to turn an operation into a query plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("Syntax Error: {0}")]
    Parse(String),

    #[error("the document does not contain any operation")]
    NoOperation,

    #[error("unknown operation named `{0}`")]
    UnknownOperation(String),

    #[error("must provide operation name if query contains multiple operations")]
    OperationNameRequired,

    #[error("subscriptions are not supported")]
    SubscriptionsUnsupported,

    #[error("the supergraph does not define a mutation type")]
    NoMutationType,

    #[error("unknown fragment `{0}`")]
    UnknownFragment(String),

    #[error("fragment `{0}` spreads itself")]
    FragmentCycle(String),

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("cannot query field `{field}` on type `{type_name}`")]
    UnknownField { type_name: String, field: String },

    #[error("field `{type_name}.{field}` of type `{field_type}` needs a selection of subfields")]
    MissingSelection {
        type_name: String,
        field: String,
        field_type: String,
    },

    #[error("field `{type_name}.{field}` of leaf type `{field_type}` cannot have a selection")]
    UnexpectedSelection {
        type_name: String,
        field: String,
        field_type: String,
    },

    #[error("variable `${0}` is not defined by the operation")]
    UndefinedVariable(String),

    #[error("argument `if` of directive `@{0}` must be a boolean")]
    InvalidDirectiveArgument(String),

    #[error("field `{type_name}.{field}` cannot be resolved by any subgraph")]
    Unreachable { type_name: String, field: String },
}

impl PlanningError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::Parse(_) => "GRAPHQL_PARSE_FAILED",
            PlanningError::Unreachable { .. } => "QUERY_PLANNING_FAILED",
            _ => "GRAPHQL_VALIDATION_FAILED",
        }
    }
}

/// A failed subgraph call. Localized to the response paths the call was
/// expected to fill.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP fetch failed from '{subgraph}': {reason}")]
    Transport { subgraph: String, reason: String },

    #[error("HTTP fetch failed from '{subgraph}': status {status}")]
    Status { subgraph: String, status: u16 },

    #[error("invalid response from '{subgraph}': {reason}")]
    InvalidResponse { subgraph: String, reason: String },

    #[error("request to '{subgraph}' timed out")]
    Timeout { subgraph: String },

    #[error("subgraph '{subgraph}' is not part of the supergraph")]
    UnknownSubgraph { subgraph: String },
}

impl FetchError {
    pub fn subgraph(&self) -> &str {
        match self {
            FetchError::Transport { subgraph, .. }
            | FetchError::Status { subgraph, .. }
            | FetchError::InvalidResponse { subgraph, .. }
            | FetchError::Timeout { subgraph }
            | FetchError::UnknownSubgraph { subgraph } => subgraph,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "GATEWAY_TIMEOUT",
            _ => "SUBREQUEST_HTTP_ERROR",
        }
    }

    pub fn to_graphql_error(&self, path: Option<ResponsePath>) -> GraphQLError {
        let error = GraphQLError::new(self.to_string())
            .with_code(self.code())
            .with_extension("serviceName", self.subgraph());
        match path {
            Some(path) => error.with_path(path),
            None => error,
        }
    }
}

/// Request-level failures that keep an operation from executing at all.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("the supergraph has not been composed yet")]
    NotReady,

    #[error(transparent)]
    Planning(#[from] PlanningError),
}

impl GatewayError {
    pub fn to_graphql_error(&self) -> GraphQLError {
        let code = match self {
            GatewayError::NotReady => "SUPERGRAPH_UNAVAILABLE",
            GatewayError::Planning(error) => error.code(),
        };
        GraphQLError::new(self.to_string()).with_code(code)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse supergraph config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid subgraph `{0}`, expected NAME=URL")]
    InvalidSubgraph(String),

    #[error("no subgraphs configured (see --supergraph-config and --subgraph)")]
    NoSubgraphs,
}
