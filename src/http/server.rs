//! HTTP gateway server run by every worker.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (tracing, request ID)
//! - Dispatch requests through the route table
//! - Forward requests to upstream backends and stream responses back
//!
//! # Design Decisions
//! - No retries: a backend failure is reported to the client as 502
//! - Client address comes from `ConnectInfo`, which for adopted
//!   connections is the address the master observed

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::http::request::{
    build_upstream_request, propagate_request_id_layer, request_id, set_request_id_layer,
};
use crate::http::response::{from_upstream, GatewayError};
use crate::observability::metrics;
use crate::routing::{RouteError, RouteTable};
use crate::worker::{AdoptingListener, ClientAddr};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub client: Client<HttpConnector, Body>,
    pub expose_details: bool,
}

/// The gateway's HTTP front: route table plus upstream client.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig) -> Result<Self, RouteError> {
        let routes = Arc::new(RouteTable::from_config(&config.routes)?);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            routes,
            client,
            expose_details: config.errors.expose_details,
        };

        Ok(Self {
            router: Self::build_router(state),
        })
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The router, for serving on a plain listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish.
    pub async fn serve<F>(self, listener: AdoptingListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self
            .router
            .into_make_service_with_connect_info::<ClientAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Looks up the route and forwards the request to its backend.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(ClientAddr(client_addr)): ConnectInfo<ClientAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let path = request.uri().path().to_string();
    let method = request.method().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        client_addr = %client_addr,
        "Proxying request"
    );

    let Some(route) = state.routes.match_path(&path) else {
        tracing::warn!(request_id = %request_id, path = %path, "No route matched");
        metrics::record_request(&method, 404, "none", start_time);
        return GatewayError::NoRoute { path }.into_response_with(state.expose_details);
    };
    let target = route.upstream.as_str();

    let upstream_request = match build_upstream_request(request, &route.upstream, client_addr) {
        Ok(r) => r,
        Err(source) => {
            tracing::warn!(request_id = %request_id, target = %target, error = %source, "Invalid upstream request");
            metrics::record_request(&method, 502, target, start_time);
            return GatewayError::InvalidUpstream {
                target: target.to_string(),
                source,
            }
            .into_response_with(state.expose_details);
        }
    };

    match state.client.request(upstream_request).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), target, start_time);
            from_upstream(response)
        }
        Err(source) => {
            tracing::error!(request_id = %request_id, target = %target, error = %source, "Upstream error");
            metrics::record_request(&method, 502, target, start_time);
            GatewayError::Upstream {
                target: target.to_string(),
                source,
            }
            .into_response_with(state.expose_details)
        }
    }
}
