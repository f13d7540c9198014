//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Dynamic REST surface with prefix-routed handlers and graceful shutdown."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use devlink_common::{DevlinkError, Result};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const API_PING: &str = "/api/v1/ping";
pub const API_VERSION: &str = "/api/version";
pub const API_DISCOVERY: &str = "/api/v1/discovery";
pub const API_DEVICE: &str = "/api/v1/device/";
pub const API_CALLBACK: &str = "/api/v1/callback";
pub const API_CONFIG: &str = "/api/v1/config";
pub const API_METRICS: &str = "/api/v1/metrics";

/// A request handed to a registered handler.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub path: String,
    pub method: Method,
    pub params: HashMap<String, String>,
    pub body: Bytes,
}

/// A handler's reply, rendered onto the HTTP response.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl RestResponse {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/plain".to_owned(),
            body: body.into(),
        }
    }

    pub fn json(value: &impl serde::Serialize) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status: 200,
                content_type: "application/json".to_owned(),
                body,
            },
            Err(err) => Self::error(500, format!("serialization failure: {err}")),
        }
    }

    pub fn error(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain".to_owned(),
            body: body.into(),
        }
    }
}

/// A REST endpoint implementation registered under a path prefix.
#[async_trait]
pub trait RestHandler: Send + Sync {
    async fn handle(&self, request: RestRequest) -> RestResponse;
}

struct RouteBinding {
    prefix: String,
    methods: Vec<Method>,
    handler: Arc<dyn RestHandler>,
}

/// The service's HTTP listener.
///
/// Routes are matched by longest registered prefix, so `/api/v1/device/`
/// covers every device subpath. Handlers may be registered after the
/// listener is up; callback registration happens while startup is still
/// provisioning devices.
pub struct RestServer {
    routes: Arc<RwLock<Vec<RouteBinding>>>,
    stop_tx: watch::Sender<bool>,
    serve_task: RwLock<Option<JoinHandle<()>>>,
}

impl Default for RestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RestServer {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            routes: Arc::new(RwLock::new(Vec::new())),
            stop_tx,
            serve_task: RwLock::new(None),
        }
    }

    /// Register a handler for all paths under `prefix`. Replaces any
    /// handler already registered for the same prefix. Takes effect
    /// immediately, even while the listener is serving.
    pub fn register_handler(
        &self,
        prefix: impl Into<String>,
        methods: Vec<Method>,
        handler: Arc<dyn RestHandler>,
    ) {
        let prefix = prefix.into();
        let mut routes = self.routes.write();
        routes.retain(|binding| binding.prefix != prefix);
        debug!(%prefix, "route registered");
        routes.push(RouteBinding {
            prefix,
            methods,
            handler,
        });
    }

    /// Bind the listener and start serving. `port` 0 asks the OS for an
    /// ephemeral port; the bound port is returned either way.
    pub async fn bind(&self, port: u16) -> Result<u16> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|err| DevlinkError::config(format!("cannot bind port {port}: {err}")))?;
        let bound = listener
            .local_addr()
            .map_err(|err| DevlinkError::config(format!("listener address: {err}")))?
            .port();

        let routes = self.routes.clone();
        let router = Router::new()
            .fallback(dispatch)
            .with_state(routes);
        let mut stop_rx = self.stop_tx.subscribe();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            });
            if let Err(err) = serve.await {
                warn!(error = %err, "http listener terminated");
            }
        });
        *self.serve_task.write() = Some(task);
        info!(port = bound, "http listener started");
        Ok(bound)
    }

    /// Stop the listener, wait for in-flight requests to drain, and drop
    /// the registered handlers with whatever resources they hold.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        let task = self.serve_task.write().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.routes.write().clear();
    }
}

async fn dispatch(
    State(routes): State<Arc<RwLock<Vec<RouteBinding>>>>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let path = uri.path().to_owned();

    // Longest registered prefix wins.
    let binding = {
        let routes = routes.read();
        routes
            .iter()
            .filter(|binding| path.starts_with(&binding.prefix))
            .max_by_key(|binding| binding.prefix.len())
            .map(|binding| (binding.methods.clone(), binding.handler.clone()))
    };

    let Some((methods, handler)) = binding else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !methods.contains(&method) {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let reply = handler
        .handle(RestRequest {
            path,
            method,
            params,
            body,
        })
        .await;
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, reply.content_type)],
        reply.body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl RestHandler for EchoHandler {
        async fn handle(&self, request: RestRequest) -> RestResponse {
            RestResponse::text(format!("{} {}", request.method, request.path))
        }
    }

    #[tokio::test]
    async fn routes_can_be_registered_after_the_listener_starts() {
        let server = RestServer::new();
        let port = server.bind(0).await.unwrap();
        let base = format!("http://127.0.0.1:{port}");
        let http = reqwest::Client::new();

        // Nothing registered yet.
        let resp = http.get(format!("{base}{API_PING}")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);

        server.register_handler(API_PING, vec![Method::GET], Arc::new(EchoHandler));
        let resp = http.get(format!("{base}{API_PING}")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await.unwrap(), format!("GET {API_PING}"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn longest_prefix_wins_and_method_is_enforced() {
        let server = RestServer::new();
        server.register_handler("/api/v1/", vec![Method::GET], Arc::new(EchoHandler));
        server.register_handler(API_DEVICE, vec![Method::GET, Method::PUT], Arc::new(EchoHandler));
        let port = server.bind(0).await.unwrap();
        let base = format!("http://127.0.0.1:{port}");
        let http = reqwest::Client::new();

        let resp = http
            .put(format!("{base}{API_DEVICE}Counter01/count"))
            .body("5")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        // The shorter prefix does not allow PUT.
        let resp = http
            .put(format!("{base}/api/v1/other"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 405);

        server.shutdown().await;
    }
}
