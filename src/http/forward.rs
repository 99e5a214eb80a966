//! Sends a rewritten request to the backend over a fresh connection.

use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper_util::rt::TokioIo;

use crate::net::BackendTarget;
use crate::security::strip_hop_by_hop;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("backend dial failed: {0}")]
    Dial(#[source] io::Error),

    #[error("backend handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("backend request failed: {0}")]
    Send(#[source] hyper::Error),
}

/// Forward `request` to `backend` and stream its response back.
///
/// Each call dials its own connection; it is closed once the response body
/// has been read.
pub async fn forward(
    backend: &BackendTarget,
    connect_timeout: Duration,
    request: Request<Body>,
) -> Result<Response<Body>, ForwardError> {
    let stream = backend.dial(connect_timeout).await.map_err(ForwardError::Dial)?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(stream))
        .await
        .map_err(ForwardError::Handshake)?;
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            tracing::debug!(%error, "Backend connection ended with error");
        }
    });

    let response = sender.send_request(request).await.map_err(ForwardError::Send)?;
    let mut response = response.map(Body::new);
    strip_hop_by_hop(response.headers_mut());
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn streams_backend_response() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 201 Created\r\ncontent-length: 2\r\nkeep-alive: timeout=5\r\nx-app: yes\r\n\r\nok")
                .await
                .unwrap();
        });

        let request = Request::builder()
            .uri("/items")
            .header("host", "app.corp.ts.net")
            .body(Body::empty())
            .unwrap();
        let response = forward(&BackendTarget::resolve(&addr.to_string()), Duration::from_secs(1), request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-app"], "yes");
        assert!(response.headers().get("keep-alive").is_none());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn dead_backend_is_dial_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = forward(&BackendTarget::resolve(&addr.to_string()), Duration::from_secs(1), request)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Dial(_)));
    }
}
