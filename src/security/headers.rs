//! Header sanitation for the backend hop.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers, including any named by `Connection`
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host
//! - Remove client-supplied copies of identity headers
//!
//! # Design Decisions
//! - X-Forwarded-For is appended to, never replaced
//! - Identity headers are only ever written by the proxy itself

use std::net::IpAddr;

use axum::http::header::{CONNECTION, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers that apply to a single transport hop and must not be forwarded.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers and every header listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Add the `X-Forwarded-*` trio for a request received over TLS from `peer`.
pub fn add_forwarded_headers(headers: &mut HeaderMap, peer: IpAddr) {
    let forwarded_for = match headers
        .get(&X_FORWARDED_FOR)
        .and_then(|existing| existing.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {peer}"),
        _ => peer.to_string(),
    };
    // An IP address always renders as a valid header value.
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));

    if let Some(host) = headers.get(HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
}

/// Drop every value of each of `names`.
pub fn strip_headers<'a>(headers: &mut HeaderMap, names: impl IntoIterator<Item = &'a HeaderName>) {
    for name in names {
        headers.remove(name);
    }
}
