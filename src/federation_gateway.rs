use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{CompositionError, GatewayError};
use crate::query_executor::QueryExecutor;
use crate::query_planner::{QueryPlan, QueryPlanner};
use crate::schema_registry::{RecomposeOutcome, SchemaRegistry, SupergraphHandle};
use crate::{GraphQLRequest, GraphQLResponse};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// Stands in for "never" when a timeout is too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Ties the pipeline together: the registry owns the supergraph, the
/// planner splits each operation into fetches and the executor runs them.
pub struct FederationGateway {
    registry: SchemaRegistry,
    query_planner: Box<dyn QueryPlanner>,
    query_executor: Box<dyn QueryExecutor>,
    request_timeout: Duration,
    expose_query_plan: bool,
}

impl FederationGateway {
    pub fn new(
        registry: SchemaRegistry,
        query_planner: Box<dyn QueryPlanner>,
        query_executor: Box<dyn QueryExecutor>,
    ) -> Self {
        FederationGateway {
            registry,
            query_planner,
            query_executor,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            expose_query_plan: false,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_query_plan_exposed(mut self, expose: bool) -> Self {
        self.expose_query_plan = expose;
        self
    }

    pub fn handle(&self) -> Arc<SupergraphHandle> {
        self.registry.handle()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// When a request arriving now has to be answered.
    pub fn deadline_from_now(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.request_timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    pub async fn process_request(&self, request: GraphQLRequest) -> GraphQLResponse {
        self.process_request_until(request, self.deadline_from_now()).await
    }

    /// Plans and executes `request`. Subgraph calls still pending at
    /// `deadline` are cancelled and reported as timeouts.
    pub async fn process_request_until(
        &self,
        request: GraphQLRequest,
        deadline: Instant,
    ) -> GraphQLResponse {
        debug!(operation = request.operation_name.as_deref(), "processing request");
        match self.try_process(&request, deadline).await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "request rejected");
                GraphQLResponse::from_error(err.to_graphql_error())
            }
        }
    }

    async fn try_process(
        &self,
        request: &GraphQLRequest,
        deadline: Instant,
    ) -> Result<GraphQLResponse, GatewayError> {
        let supergraph = self.registry.handle().load().await.ok_or(GatewayError::NotReady)?;
        let query_plan = self.query_planner.plan_query(request, &supergraph)?;

        let no_variables = Map::new();
        let variables = request.variables.as_ref().unwrap_or(&no_variables);
        let mut response = self
            .query_executor
            .execute_plan(&query_plan, &supergraph, variables, deadline)
            .await;

        if self.expose_query_plan {
            response
                .extensions
                .insert("queryPlan".to_string(), plan_to_json(&query_plan));
        }
        Ok(response)
    }

    /// Re-fetches every subgraph schema and swaps in the new supergraph.
    /// On failure the current supergraph keeps serving.
    pub async fn recompose(&self) -> Result<RecomposeOutcome, CompositionError> {
        let outcome = self.registry.recompose().await;
        match &outcome {
            Ok(RecomposeOutcome::Updated) => info!("recomposition installed a new supergraph"),
            Ok(RecomposeOutcome::Unchanged) => debug!("recomposition found no schema changes"),
            Err(err) => warn!(error = %err, "recomposition failed, keeping the current supergraph"),
        }
        outcome
    }

    /// Recomposes every `interval` until the returned task is aborted.
    pub fn spawn_polling(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately and startup has just composed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = gateway.recompose().await;
            }
        })
    }
}

fn plan_to_json(plan: &QueryPlan) -> Value {
    serde_json::to_value(plan).unwrap_or_else(|err| {
        error!(error = %err, "failed to serialize query plan");
        Value::Null
    })
}
