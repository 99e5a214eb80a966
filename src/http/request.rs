//! Request rewriting for the backend hop.
//!
//! # Responsibilities
//! - Turn the inbound request target into origin-form (`/path?query`)
//! - Normalize to HTTP/1.1, the protocol spoken to the backend
//! - Keep the client's `Host`, filling it in when the client sent none
//! - Sanitize headers (see `security::headers`)

use std::net::SocketAddr;

use axum::http::header::HOST;
use axum::http::{HeaderValue, Request, Uri, Version};

use crate::security::{add_forwarded_headers, strip_hop_by_hop};

/// Rewrite `request` so it can be sent as-is to the backend.
///
/// `fallback_host` is used for `Host` when neither the header nor the request
/// target carries an authority.
pub fn rewrite_target<B>(mut request: Request<B>, peer: SocketAddr, fallback_host: &str) -> Request<B> {
    if !request.headers().contains_key(HOST) {
        let host = request
            .uri()
            .authority()
            .map(|authority| authority.as_str().to_owned())
            .unwrap_or_else(|| fallback_host.to_owned());
        if let Ok(value) = HeaderValue::from_str(&host) {
            request.headers_mut().insert(HOST, value);
        }
    }

    let target = request
        .uri()
        .path_and_query()
        .cloned()
        .map(Uri::from)
        .unwrap_or_else(|| Uri::from_static("/"));
    *request.uri_mut() = target;
    *request.version_mut() = Version::HTTP_11;

    let headers = request.headers_mut();
    strip_hop_by_hop(headers);
    add_forwarded_headers(headers, peer.ip());

    request
}
