//! Query plan execution.
//!
//! Fetches run against the subgraphs over HTTP and their data is merged into
//! one response tree. Entity fetches read their representations from that
//! tree once their prerequisites are done. A failed fetch only costs the
//! fields it was meant to provide.

mod introspection;
mod response;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::{BoxFuture, join_all};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::composition::Supergraph;
use crate::error::FetchError;
use crate::query_planner::operation::{Selection, SelectionSet, internal_value, is_internal_alias};
use crate::query_planner::{EntityRequirement, FetchNode, PlanNode, QueryPlan};
use crate::{GraphQLError, GraphQLResponse, PathSegment, ResponsePath};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs `plan` and returns the client response. Never fails as a whole:
    /// subgraph failures end up in `errors` next to whatever data could be
    /// fetched before `deadline`.
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        supergraph: &Supergraph,
        variables: &Map<String, Value>,
        deadline: Instant,
    ) -> GraphQLResponse;
}

#[derive(Debug, Clone, Default)]
pub struct HttpQueryExecutor {
    client: reqwest::Client,
}

impl HttpQueryExecutor {
    pub fn new() -> Self {
        HttpQueryExecutor {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpQueryExecutor { client }
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        supergraph: &Supergraph,
        variables: &Map<String, Value>,
        deadline: Instant,
    ) -> GraphQLResponse {
        let context = ExecutionContext {
            client: &self.client,
            supergraph,
            variables,
            deadline,
            data: Mutex::new(Value::Object(Map::new())),
            errors: Mutex::new(Vec::new()),
        };
        if let Some(node) = &plan.node {
            context.execute_node(node).await;
        }

        let data = context.data.into_inner();
        let errors = context.errors.into_inner();
        response::complete(&plan.operation, supergraph, variables, &data, errors)
    }
}

#[derive(Debug, Deserialize)]
struct SubgraphResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQLError>>,
}

/// An object at an entity fetch's merge path and the index of the
/// representation sent for it.
#[derive(Debug, Clone)]
struct EntityTarget {
    path: ResponsePath,
    type_name: String,
    index: usize,
}

/// Per-request state, dropped once the response is complete.
struct ExecutionContext<'a> {
    client: &'a reqwest::Client,
    supergraph: &'a Supergraph,
    variables: &'a Map<String, Value>,
    deadline: Instant,
    data: Mutex<Value>,
    errors: Mutex<Vec<GraphQLError>>,
}

impl ExecutionContext<'_> {
    fn execute_node<'n>(&'n self, node: &'n PlanNode) -> BoxFuture<'n, ()> {
        Box::pin(async move {
            match node {
                PlanNode::Sequence { nodes } => {
                    for node in nodes {
                        self.execute_node(node).await;
                    }
                }
                PlanNode::Parallel { nodes } => {
                    join_all(nodes.iter().map(|node| self.execute_node(node))).await;
                }
                PlanNode::Fetch(fetch) => self.execute_fetch(fetch).await,
            }
        })
    }

    async fn execute_fetch(&self, fetch: &FetchNode) {
        let mut variables: Map<String, Value> = fetch
            .variable_usages
            .iter()
            .filter_map(|name| self.variables.get(name).map(|value| (name.clone(), value.clone())))
            .collect();

        let targets = match &fetch.requires {
            None => None,
            Some(requirement) => {
                let (targets, representations) = self.entity_targets(fetch, requirement).await;
                if targets.is_empty() {
                    debug!(subgraph = %fetch.subgraph, id = fetch.id, "no entities to resolve");
                    return;
                }
                variables.insert("representations".to_string(), Value::Array(representations));
                Some(targets)
            }
        };

        debug!(subgraph = %fetch.subgraph, id = fetch.id, "sending subgraph request");
        let body = json!({ "query": fetch.operation, "variables": variables });
        match self.send(&fetch.subgraph, &body).await {
            Ok(response) => self.merge_response(fetch, targets.as_deref(), response).await,
            Err(error) => {
                warn!(subgraph = %fetch.subgraph, id = fetch.id, %error, "subgraph request failed");
                self.record_failure(fetch, targets.as_deref(), &error).await;
            }
        }
    }

    /// Finds the objects an entity fetch resolves and builds their
    /// deduplicated representations.
    async fn entity_targets(
        &self,
        fetch: &FetchNode,
        requirement: &EntityRequirement,
    ) -> (Vec<EntityTarget>, Vec<Value>) {
        let data = self.data.lock().await;
        let mut objects = Vec::new();
        collect_objects(&data, &fetch.merge_path, &mut Vec::new(), &mut objects);

        let mut seen = HashMap::new();
        let mut representations = Vec::new();
        let mut targets = Vec::new();
        for (path, object) in objects {
            let type_name = internal_value(object, "__typename").and_then(Value::as_str);
            let Some(type_name) = type_name else {
                continue;
            };
            if !requirement.type_names.iter().any(|name| name == type_name) {
                continue;
            }
            let representation = representation(object, &requirement.representation, type_name);
            let Some(representation) = representation else {
                continue;
            };
            let index = *seen.entry(representation.to_string()).or_insert_with(|| {
                representations.push(representation);
                representations.len() - 1
            });
            targets.push(EntityTarget {
                path,
                type_name: type_name.to_string(),
                index,
            });
        }
        (targets, representations)
    }

    async fn send(&self, subgraph: &str, body: &Value) -> Result<SubgraphResponse, FetchError> {
        let url = self
            .supergraph
            .subgraph_url(subgraph)
            .ok_or_else(|| FetchError::UnknownSubgraph {
                subgraph: subgraph.to_string(),
            })?;
        match timeout_at(self.deadline, post(self.client, subgraph, url, body)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                subgraph: subgraph.to_string(),
            }),
        }
    }

    async fn merge_response(
        &self,
        fetch: &FetchNode,
        targets: Option<&[EntityTarget]>,
        response: SubgraphResponse,
    ) {
        let subgraph_errors = response.errors.unwrap_or_default();
        let mut failure = None;
        let mut unresolved = Vec::new();
        {
            let mut data = self.data.lock().await;
            match targets {
                None => {
                    if let Some(received) = response.data {
                        deep_merge(&mut data, received);
                    }
                }
                Some(targets) => {
                    let entities = response
                        .data
                        .and_then(|mut received| received.get_mut("_entities").map(Value::take));
                    match entities {
                        Some(Value::Array(entities)) => {
                            unresolved = merge_entities(&mut data, targets, &entities);
                            if !unresolved.is_empty() {
                                let sent = targets.iter().map(|target| target.index + 1).max();
                                failure = Some(FetchError::InvalidResponse {
                                    subgraph: fetch.subgraph.clone(),
                                    reason: format!(
                                        "`_entities` returned {} items for {} representations",
                                        entities.len(),
                                        sent.unwrap_or_default()
                                    ),
                                });
                            }
                        }
                        _ if !subgraph_errors.is_empty() => {}
                        _ => {
                            failure = Some(FetchError::InvalidResponse {
                                subgraph: fetch.subgraph.clone(),
                                reason: "missing `_entities` in response data".to_string(),
                            });
                        }
                    }
                }
            }
        }

        if let Some(error) = failure {
            warn!(subgraph = %fetch.subgraph, id = fetch.id, %error, "subgraph request failed");
            let failed = if unresolved.is_empty() { targets } else { Some(unresolved.as_slice()) };
            self.record_failure(fetch, failed, &error).await;
        }

        let mut errors = self.errors.lock().await;
        for error in subgraph_errors {
            let error = error.with_extension("serviceName", fetch.subgraph.as_str());
            match targets {
                None => errors.push(error),
                Some(targets) => errors.extend(rewrite_entity_error(error, targets)),
            }
        }
    }

    /// Records `error` at every response path the fetch was expected to
    /// fill.
    async fn record_failure(
        &self,
        fetch: &FetchNode,
        targets: Option<&[EntityTarget]>,
        error: &FetchError,
    ) {
        let mut errors = self.errors.lock().await;
        match targets {
            None => {
                for key in contributed_keys(&fetch.selection, None) {
                    errors.push(error.to_graphql_error(Some(vec![PathSegment::Key(key)])));
                }
            }
            Some(targets) => {
                for target in targets {
                    for key in contributed_keys(&fetch.selection, Some(&target.type_name)) {
                        let mut path = target.path.clone();
                        path.push(PathSegment::Key(key));
                        errors.push(error.to_graphql_error(Some(path)));
                    }
                }
            }
        }
    }
}

async fn post(
    client: &reqwest::Client,
    subgraph: &str,
    url: &str,
    body: &Value,
) -> Result<SubgraphResponse, FetchError> {
    let transport = |error: reqwest::Error| FetchError::Transport {
        subgraph: subgraph.to_string(),
        reason: error.to_string(),
    };
    let response = client.post(url).json(body).send().await.map_err(transport)?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport)?;

    let parsed = serde_json::from_slice::<SubgraphResponse>(&bytes);
    if !status.is_success() {
        // Some servers answer GraphQL errors with a 4xx/5xx status.
        return match parsed {
            Ok(response) if response.errors.as_ref().is_some_and(|errors| !errors.is_empty()) => {
                Ok(response)
            }
            _ => Err(FetchError::Status {
                subgraph: subgraph.to_string(),
                status: status.as_u16(),
            }),
        };
    }
    parsed.map_err(|error| FetchError::InvalidResponse {
        subgraph: subgraph.to_string(),
        reason: error.to_string(),
    })
}

/// Maps an error on `["_entities", i, ...]` to the client paths of the
/// objects that sent representation `i`.
fn rewrite_entity_error(error: GraphQLError, targets: &[EntityTarget]) -> Vec<GraphQLError> {
    let index = match error.path.as_deref() {
        Some([PathSegment::Key(root), PathSegment::Index(index), ..]) if root == "_entities" => {
            Some(*index)
        }
        _ => None,
    };
    let Some(index) = index else {
        return vec![GraphQLError { path: None, ..error }];
    };

    let rest: Vec<PathSegment> = error.path.iter().flatten().skip(2).cloned().collect();
    let rewritten: Vec<GraphQLError> = targets
        .iter()
        .filter(|target| target.index == index)
        .map(|target| {
            let mut path = target.path.clone();
            path.extend(rest.iter().cloned());
            error.clone().with_path(path)
        })
        .collect();
    if rewritten.is_empty() {
        vec![GraphQLError { path: None, ..error }]
    } else {
        rewritten
    }
}

/// Response keys a fetch contributes to an object of `type_name` (any type
/// when `None`).
fn contributed_keys(selection: &SelectionSet, type_name: Option<&str>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for item in &selection.items {
        match item {
            Selection::Field(field) => {
                let key = field.response_key();
                let internal = key == "__typename" || is_internal_alias(key);
                if !internal && !keys.iter().any(|existing| existing == key) {
                    keys.push(key.to_string());
                }
            }
            Selection::InlineFragment(fragment) => {
                let applies = match (fragment.type_condition.as_deref(), type_name) {
                    (Some(condition), Some(type_name)) => condition == type_name,
                    _ => true,
                };
                if applies {
                    for key in contributed_keys(&fragment.selection_set, type_name) {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
            }
        }
    }
    keys
}

/// Collects the objects found by following `merge_path` from `value`.
fn collect_objects<'v>(
    value: &'v Value,
    merge_path: &[String],
    path: &mut ResponsePath,
    out: &mut Vec<(ResponsePath, &'v Map<String, Value>)>,
) {
    match (merge_path.split_first(), value) {
        (None, Value::Object(object)) => out.push((path.clone(), object)),
        (Some((segment, rest)), Value::Array(items)) if segment == "@" => {
            for (index, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                collect_objects(item, rest, path, out);
                path.pop();
            }
        }
        (Some((segment, rest)), Value::Object(object)) => {
            if let Some(child) = object.get(segment) {
                path.push(PathSegment::Key(segment.clone()));
                collect_objects(child, rest, path, out);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Merges every returned entity into the object it was fetched for and
/// returns the targets the subgraph sent nothing back for.
fn merge_entities(
    data: &mut Value,
    targets: &[EntityTarget],
    entities: &[Value],
) -> Vec<EntityTarget> {
    let mut unresolved = Vec::new();
    for target in targets {
        match entities.get(target.index) {
            Some(entity) => {
                if let Some(slot) = value_at_mut(data, &target.path) {
                    deep_merge(slot, entity.clone());
                }
            }
            None => unresolved.push(target.clone()),
        }
    }
    unresolved
}

fn value_at_mut<'v>(value: &'v mut Value, path: &[PathSegment]) -> Option<&'v mut Value> {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(object)) => object.get_mut(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Merges `source` into `target`. Nulls never overwrite data another fetch
/// already delivered.
fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (_, Value::Null) => {}
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) if target.len() == source.len() => {
            for (existing, value) in target.iter_mut().zip(source) {
                deep_merge(existing, value);
            }
        }
        (target, source) => *target = source,
    }
}

/// Projects `object` onto the representation selection for `type_name`.
/// `None` when the object lacks a field the representation needs.
fn representation(
    object: &Map<String, Value>,
    selection: &SelectionSet,
    type_name: &str,
) -> Option<Value> {
    let mut out = Map::new();
    select_into(object, selection, type_name, &mut out)?;
    Some(Value::Object(out))
}

fn select_into(
    object: &Map<String, Value>,
    selection: &SelectionSet,
    type_name: &str,
    out: &mut Map<String, Value>,
) -> Option<()> {
    for item in &selection.items {
        match item {
            Selection::Field(field) => {
                let key = field.response_key();
                let value = internal_value(object, key)?;
                let value = if field.selection_set.is_empty() {
                    value.clone()
                } else {
                    select_value(value, &field.selection_set)?
                };
                out.insert(key.to_string(), value);
            }
            Selection::InlineFragment(fragment) => {
                let applies = fragment
                    .type_condition
                    .as_deref()
                    .is_none_or(|condition| condition == type_name);
                if applies {
                    select_into(object, &fragment.selection_set, type_name, out)?;
                }
            }
        }
    }
    Some(())
}

fn select_value(value: &Value, selection: &SelectionSet) -> Option<Value> {
    match value {
        Value::Null => Some(Value::Null),
        Value::Array(items) => items
            .iter()
            .map(|item| select_value(item, selection))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Value::Object(object) => {
            let type_name = internal_value(object, "__typename")
                .and_then(Value::as_str)
                .unwrap_or_default();
            representation(object, selection, type_name)
        }
        _ => None,
    }
}
