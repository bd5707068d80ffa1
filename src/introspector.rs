use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::SubgraphConfig;
use crate::error::CompositionError;

/// The federation query every subgraph answers with its own SDL.
pub const SERVICE_SDL_QUERY: &str = "query __ApolloGetServiceDefinition__ { _service { sdl } }";

#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Returns the SDL of `subgraph`.
    async fn fetch_sdl(&self, subgraph: &SubgraphConfig) -> Result<String, CompositionError>;
}

/// Reads static SDL from the config when present, otherwise asks the
/// subgraph for it over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSchemaIntrospector {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpSchemaIntrospector {
    pub fn new(timeout: Duration) -> Self {
        HttpSchemaIntrospector {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[derive(Deserialize)]
struct ServiceResponse {
    data: Option<ServiceData>,
    #[serde(default)]
    errors: Option<Vec<crate::GraphQLError>>,
}

#[derive(Deserialize)]
struct ServiceData {
    #[serde(rename = "_service")]
    service: Option<ServiceSdl>,
}

#[derive(Deserialize)]
struct ServiceSdl {
    sdl: Option<String>,
}

#[async_trait]
impl SchemaIntrospector for HttpSchemaIntrospector {
    async fn fetch_sdl(&self, subgraph: &SubgraphConfig) -> Result<String, CompositionError> {
        if let Some(sdl) = &subgraph.sdl {
            return Ok(sdl.clone());
        }

        let failed = |reason: String| CompositionError::Introspection {
            subgraph: subgraph.name.clone(),
            reason,
        };

        debug!(subgraph = %subgraph.name, url = %subgraph.url, "introspecting subgraph");
        let response = self
            .client
            .post(&subgraph.url)
            .timeout(self.timeout)
            .json(&json!({ "query": SERVICE_SDL_QUERY }))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("status {status}")));
        }

        let body: ServiceResponse = response.json().await.map_err(|e| failed(e.to_string()))?;
        if let Some(error) = body.errors.as_ref().and_then(|errors| errors.first()) {
            return Err(failed(error.message.clone()));
        }
        body.data
            .and_then(|data| data.service)
            .and_then(|service| service.sdl)
            .ok_or_else(|| failed("response has no `_service.sdl`".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn static_sdl_skips_the_network() {
        let introspector = HttpSchemaIntrospector::new(Duration::from_secs(1));
        let subgraph = SubgraphConfig::new("products", "http://127.0.0.1:9/graphql")
            .with_sdl("type Query { a: Int }");

        assert_eq!(introspector.fetch_sdl(&subgraph).await.unwrap(), "type Query { a: Int }");
    }

    #[tokio::test]
    async fn fetches_the_service_sdl() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "query": SERVICE_SDL_QUERY })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "_service": { "sdl": "type Query { a: Int }" } }
            })))
            .mount(&server)
            .await;

        let introspector = HttpSchemaIntrospector::new(Duration::from_secs(1));
        let subgraph = SubgraphConfig::new("products", server.uri());
        assert_eq!(introspector.fetch_sdl(&subgraph).await.unwrap(), "type Query { a: Int }");
    }

    #[tokio::test]
    async fn reports_subgraphs_without_federation_support() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "message": "Cannot query field \"_service\" on type \"Query\"." }]
            })))
            .mount(&server)
            .await;

        let introspector = HttpSchemaIntrospector::new(Duration::from_secs(1));
        let error = introspector
            .fetch_sdl(&SubgraphConfig::new("legacy", server.uri()))
            .await
            .unwrap_err();
        assert!(
            matches!(
                error,
                CompositionError::Introspection { ref subgraph, .. } if subgraph == "legacy"
            ),
            "{error}"
        );
    }
}
