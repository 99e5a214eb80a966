//! Identity header policy for HTTP mode.
//!
//! Requests pass through two explicit stages before forwarding:
//!
//! ```text
//! request ─ rewrite_target ─▶ request' ─ inject_identity_headers(identity) ─▶ request''
//! ```
//!
//! The first stage also removes any identity headers the client sent, so a
//! header that reaches the backend was always written by the second stage.

use std::sync::Arc;

use axum::http::header::InvalidHeaderName;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};

use crate::config::{HeaderConfig, IdentityConfig};
use crate::identity::IdentityRecord;
use crate::net::BackendTarget;
use crate::security::strip_headers;

/// Names of the headers carrying the caller's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNames {
    pub email: HeaderName,
    pub user: HeaderName,
    pub network: HeaderName,
    pub name: HeaderName,
}

impl HeaderNames {
    pub fn from_config(config: &HeaderConfig) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            email: HeaderName::from_bytes(config.email.as_bytes())?,
            user: HeaderName::from_bytes(config.user.as_bytes())?,
            network: HeaderName::from_bytes(config.network.as_bytes())?,
            name: HeaderName::from_bytes(config.name.as_bytes())?,
        })
    }

    pub fn all(&self) -> [&HeaderName; 4] {
        [&self.email, &self.user, &self.network, &self.name]
    }
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            email: HeaderName::from_static("x-webauth-email"),
            user: HeaderName::from_static("x-webauth-user"),
            network: HeaderName::from_static("x-webauth-network"),
            name: HeaderName::from_static("x-webauth-name"),
        }
    }
}

/// Derive the tailnet name from a node's fully qualified name.
///
/// `laptop.corp.example.com.beta.tailscale.net.` with computed name `laptop`
/// and suffix `.beta.tailscale.net` yields `corp.example.com`. Returns `None`
/// when `node_name` does not start with `<computed_node_name>.` or nothing is
/// left after stripping.
pub fn tailnet_name<'a>(node_name: &'a str, computed_node_name: &str, network_suffix: &str) -> Option<&'a str> {
    if computed_node_name.is_empty() {
        return None;
    }
    let fqdn = node_name.strip_suffix('.').unwrap_or(node_name);
    let rest = fqdn
        .strip_prefix(computed_node_name)
        .and_then(|rest| rest.strip_prefix('.'))?;
    let tailnet = rest.strip_suffix(network_suffix).unwrap_or(rest);
    (!tailnet.is_empty()).then_some(tailnet)
}

/// Applies the identity header policy to proxied requests.
#[derive(Debug, Clone)]
pub struct Director {
    headers: HeaderNames,
    network_suffix: String,
    backend: Arc<BackendTarget>,
}

impl Director {
    pub fn new(headers: HeaderNames, network_suffix: impl Into<String>, backend: Arc<BackendTarget>) -> Self {
        Self {
            headers,
            network_suffix: network_suffix.into(),
            backend,
        }
    }

    pub fn from_config(
        headers: &HeaderConfig,
        identity: &IdentityConfig,
        backend: Arc<BackendTarget>,
    ) -> Result<Self, InvalidHeaderName> {
        Ok(Self::new(
            HeaderNames::from_config(headers)?,
            identity.network_suffix.clone(),
            backend,
        ))
    }

    pub fn header_names(&self) -> &HeaderNames {
        &self.headers
    }

    pub fn backend(&self) -> &Arc<BackendTarget> {
        &self.backend
    }

    /// Point the request at the backend and drop client-supplied identity headers.
    pub fn rewrite_target<B>(&self, request: Request<B>, peer: std::net::SocketAddr) -> Request<B> {
        let mut request = super::request::rewrite_target(request, peer, self.backend.authority());
        strip_headers(request.headers_mut(), self.headers.all());
        request
    }

    /// Set the identity headers for `identity`, replacing any existing values.
    pub fn inject_identity_headers<B>(&self, mut request: Request<B>, identity: &IdentityRecord) -> Request<B> {
        let headers = request.headers_mut();

        set_header(headers, &self.headers.email, &identity.login_name);
        set_header(headers, &self.headers.user, identity.user_name());
        let display_name = if identity.display_name.is_empty() {
            &identity.login_name
        } else {
            &identity.display_name
        };
        set_header(headers, &self.headers.name, display_name);

        if identity.is_shared_node {
            headers.remove(&self.headers.network);
            return request;
        }

        match tailnet_name(&identity.node_name, &identity.computed_node_name, &self.network_suffix) {
            Some(tailnet) => set_header(headers, &self.headers.network, tailnet),
            None => {
                headers.remove(&self.headers.network);
                tracing::warn!(
                    node_name = %identity.node_name,
                    computed_node_name = %identity.computed_node_name,
                    "Could not derive tailnet name, omitting network header"
                );
            }
        }

        request
    }
}

fn set_header(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    match HeaderValue::from_bytes(value.as_bytes()) {
        Ok(value) => {
            headers.insert(name.clone(), value);
        }
        Err(_) => {
            headers.remove(name);
            tracing::warn!(header = %name, "Identity value is not a valid header value, omitting");
        }
    }
}
