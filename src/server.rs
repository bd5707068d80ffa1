//! HTTP front of the gateway.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::federation_gateway::FederationGateway;
use crate::{GraphQLRequest, GraphQLResponse};

pub type ResponseBody = BoxBody<Bytes, hyper::Error>;

fn full<T: Into<Bytes>>(value: T) -> ResponseBody {
    Full::new(value.into()).map_err(|never| match never {}).boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - fedgate</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

/// Accepts connections on `listener` forever, one task per connection.
pub async fn serve(listener: TcpListener, gateway: Arc<FederationGateway>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("GraphQL endpoint listening on http://{addr}/graphql");
        info!("GraphiQL available at http://{addr}/graphiql");
    }

    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = Arc::clone(&gateway);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, Arc::clone(&gateway)));

            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                warn!(%remote, error = %err, "error serving connection");
            }
        });
    }
}

pub async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<FederationGateway>,
) -> Result<Response<ResponseBody>, Infallible> {
    // The deadline runs from arrival, so a slow upload counts against it.
    let deadline = gateway.deadline_from_now();

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    debug!(error = %err, "failed to read request body");
                    return Ok(text(StatusCode::BAD_REQUEST, "Failed to read request body"));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body) {
                Ok(request) => {
                    let response = gateway.process_request_until(request, deadline).await;
                    graphql_response(&response)
                }
                Err(err) => text(StatusCode::BAD_REQUEST, format!("Invalid JSON request: {err}")),
            }
        }

        (&Method::GET, "/graphiql") => Response::builder()
            .header(header::CONTENT_TYPE, "text/html")
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(GRAPHIQL_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, "/graphiql")
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/health") => {
            let ready = gateway.handle().load().await.is_some();
            let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
            let body = json!({ "status": if ready { "ok" } else { "composing" } });
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(full(body.to_string()))
                .unwrap_or_else(|_| internal_server_error())
        }

        (&Method::OPTIONS, _) => Response::builder()
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
            .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn graphql_response(response: &GraphQLResponse) -> Response<ResponseBody> {
    match serde_json::to_vec(response) {
        Ok(json) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(json))
            .unwrap_or_else(|_| internal_server_error()),
        Err(err) => {
            warn!(error = %err, "failed to serialize response");
            internal_server_error()
        }
    }
}

fn text(status: StatusCode, message: impl Into<Bytes>) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(full(message))
        .unwrap_or_else(|_| internal_server_error())
}

fn internal_server_error() -> Response<ResponseBody> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
