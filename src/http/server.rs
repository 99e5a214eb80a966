//! HTTP server setup for HTTP mode.
//!
//! # Responsibilities
//! - Create the Axum Router with the proxy handler and middleware
//!   (tracing, request ID)
//! - Serve HTTP/1.1 and HTTP/2 on already-terminated TLS streams
//! - Run the director pipeline per request and forward to the backend

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::ServiceExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::director::Director;
use super::forward::forward;
use crate::identity::IdentityClient;
use crate::BoxError;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub director: Arc<Director>,
    pub identity: IdentityClient,
    pub lookup_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Reverse proxy that serves one TLS connection at a time through a shared router.
#[derive(Clone)]
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve requests arriving on `io` until the client goes away.
    ///
    /// When `stop` completes, in-flight requests finish and the connection is
    /// closed gracefully.
    pub async fn serve_connection<IO, F>(&self, io: IO, remote_addr: SocketAddr, stop: F) -> Result<(), BoxError>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        let router = self.router.clone();
        let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(ConnectInfo(remote_addr));
            router.clone().oneshot(request)
        });

        let builder = Builder::new(TokioExecutor::new());
        let connection = builder.serve_connection(TokioIo::new(io), service);
        tokio::pin!(connection);
        tokio::pin!(stop);

        tokio::select! {
            served = connection.as_mut() => served,
            () = &mut stop => {
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        }
    }
}

/// Main proxy handler.
///
/// Identity lookup failure is not fatal here: the request goes to the backend
/// without identity headers.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let request = state.director.rewrite_target(request, remote_addr);

    let request = match state.identity.lookup(remote_addr, state.lookup_timeout).await {
        Ok(identity) => {
            tracing::debug!(
                request_id = %request_id,
                remote_addr = %remote_addr,
                login_name = %identity.login_name,
                node_name = %identity.node_name,
                "Identity resolved"
            );
            state.director.inject_identity_headers(request, &identity)
        }
        Err(error) => {
            tracing::warn!(
                request_id = %request_id,
                remote_addr = %remote_addr,
                error = %error,
                "Identity lookup failed, forwarding without identity headers"
            );
            request
        }
    };

    match forward(state.director.backend(), state.connect_timeout, request).await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(
                request_id = %request_id,
                remote_addr = %remote_addr,
                backend = %state.director.backend(),
                error = %error,
                "Upstream error"
            );
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
