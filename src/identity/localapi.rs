//! Client for the overlay daemon's local API.
//!
//! Speaks HTTP/1.1 over the daemon's Unix socket, one fresh connection per
//! call. Serves three roles for the proxy: identity resolver, certificate
//! provider and overlay membership (status / join).

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::net::UnixStream;

use super::{IdentityRecord, IdentityResolver};
use crate::net::CertificateProvider;
use crate::resilience::{with_deadline, Elapsed};
use crate::BoxError;

/// Socket of a system-wide daemon.
pub const DEFAULT_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";

/// Host header the daemon expects on local API calls.
const LOCALAPI_HOST: &str = "local-tailscaled.sock";

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum LocalApiError {
    #[error("local API socket: {0}")]
    Io(#[from] std::io::Error),

    #[error("local API transport: {0}")]
    Http(#[from] hyper::Error),

    #[error("building local API request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("local API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("decoding local API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("node needs login and no auth key was provided")]
    NeedsLogin,

    #[error(transparent)]
    Timeout(#[from] Elapsed),
}

/// Subset of the daemon status the proxy cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Status {
    #[serde(default)]
    pub backend_state: String,
    #[serde(rename = "TailscaleIPs", default, deserialize_with = "null_as_default")]
    pub tailscale_ips: Vec<IpAddr>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cert_domains: Vec<String>,
}

impl Status {
    pub fn is_running(&self) -> bool {
        self.backend_state == "Running"
    }

    pub fn needs_login(&self) -> bool {
        self.backend_state == "NeedsLogin"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WhoIsResponse {
    node: WhoIsNode,
    user_profile: UserProfile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WhoIsNode {
    name: String,
    #[serde(default)]
    computed_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    hostinfo: Hostinfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Hostinfo {
    #[serde(default)]
    sharee_node: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserProfile {
    login_name: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartOptions<'a> {
    auth_key: &'a str,
    update_prefs: StartPrefs<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartPrefs<'a> {
    hostname: &'a str,
    want_running: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn parse_whois(body: &[u8]) -> Result<IdentityRecord, serde_json::Error> {
    let whois: WhoIsResponse = serde_json::from_slice(body)?;
    Ok(IdentityRecord {
        login_name: whois.user_profile.login_name,
        display_name: whois.user_profile.display_name,
        computed_node_name: whois.node.computed_name,
        node_name: whois.node.name,
        is_shared_node: whois.node.hostinfo.sharee_node,
    })
}

/// Handle to the daemon's local API socket.
#[derive(Debug, Clone)]
pub struct LocalApiClient {
    socket_path: PathBuf,
}

impl LocalApiClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Identity of the node and user behind `peer`.
    pub async fn whois(&self, peer: SocketAddr) -> Result<IdentityRecord, LocalApiError> {
        let addr: String = url::form_urlencoded::byte_serialize(peer.to_string().as_bytes()).collect();
        let body = self
            .call(Method::GET, &format!("/localapi/v0/whois?addr={addr}"), None)
            .await?;
        Ok(parse_whois(&body)?)
    }

    /// PEM private key followed by the certificate chain for `domain`.
    pub async fn certificate_pair(&self, domain: &str) -> Result<Vec<u8>, LocalApiError> {
        let body = self
            .call(Method::GET, &format!("/localapi/v0/cert/{domain}?type=pair"), None)
            .await?;
        Ok(body.to_vec())
    }

    pub async fn status(&self) -> Result<Status, LocalApiError> {
        let body = self.call(Method::GET, "/localapi/v0/status", None).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Bring the node onto the overlay network.
    ///
    /// Logs in with `auth_key` when the node needs it, then polls until the
    /// daemon reports `Running` or `timeout` passes.
    pub async fn join(
        &self,
        hostname: &str,
        auth_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Status, LocalApiError> {
        let status = self.status().await?;
        if status.is_running() {
            return Ok(status);
        }

        if status.needs_login() {
            let auth_key = auth_key.ok_or(LocalApiError::NeedsLogin)?;
            let options = StartOptions {
                auth_key,
                update_prefs: StartPrefs {
                    hostname,
                    want_running: true,
                },
            };
            self.call(Method::POST, "/localapi/v0/start", Some(serde_json::to_vec(&options)?))
                .await?;
            tracing::info!(hostname, "Overlay login started");
        }

        with_deadline("overlay join", timeout, async {
            loop {
                tokio::time::sleep(JOIN_POLL_INTERVAL).await;
                let status = self.status().await?;
                if status.is_running() {
                    return Ok::<_, LocalApiError>(status);
                }
                tracing::debug!(state = %status.backend_state, "Waiting for overlay node");
            }
        })
        .await?
    }

    async fn call(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, LocalApiError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::debug!(%error, "Local API connection ended with error");
            }
        });

        let mut request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header(HOST, LOCALAPI_HOST);
        if body.is_some() {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        let request = request.body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            return Err(LocalApiError::Status {
                status,
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl IdentityResolver for LocalApiClient {
    async fn whois(&self, peer: SocketAddr) -> Result<IdentityRecord, BoxError> {
        Ok(LocalApiClient::whois(self, peer).await?)
    }
}

#[async_trait]
impl CertificateProvider for LocalApiClient {
    async fn certificate_pem(&self, server_name: Option<&str>) -> Result<Vec<u8>, BoxError> {
        let domain = server_name.ok_or("client did not send a server name")?;
        Ok(self.certificate_pair(domain).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path as UrlPath, Query};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const WHOIS: &str = r#"{
        "Node": {
            "ID": 42,
            "Name": "laptop.corp.example.com.beta.tailscale.net.",
            "ComputedName": "laptop",
            "Hostinfo": {"Hostname": "laptop", "ShareeNode": false}
        },
        "UserProfile": {
            "ID": 7,
            "LoginName": "alice@example.com",
            "DisplayName": "Alice Example"
        }
    }"#;

    #[test]
    fn parses_whois_payload() {
        let identity = parse_whois(WHOIS.as_bytes()).unwrap();
        assert_eq!(identity.login_name, "alice@example.com");
        assert_eq!(identity.display_name, "Alice Example");
        assert_eq!(identity.computed_node_name, "laptop");
        assert_eq!(identity.node_name, "laptop.corp.example.com.beta.tailscale.net.");
        assert!(!identity.is_shared_node);
    }

    #[test]
    fn sharee_flag_and_missing_hostinfo() {
        let shared = r#"{"Node":{"Name":"n.x.","ComputedName":"n","Hostinfo":{"ShareeNode":true}},
                         "UserProfile":{"LoginName":"bob@other.org"}}"#;
        assert!(parse_whois(shared.as_bytes()).unwrap().is_shared_node);

        let bare = r#"{"Node":{"Name":"n.x.","Hostinfo":null},"UserProfile":{"LoginName":"bob"}}"#;
        let identity = parse_whois(bare.as_bytes()).unwrap();
        assert!(!identity.is_shared_node);
        assert_eq!(identity.computed_node_name, "");
        assert_eq!(identity.display_name, "");
    }

    #[test]
    fn status_tolerates_null_lists() {
        let status: Status =
            serde_json::from_str(r#"{"BackendState":"Running","TailscaleIPs":null,"CertDomains":null}"#).unwrap();
        assert!(status.is_running());
        assert!(status.tailscale_ips.is_empty());
        assert!(status.cert_domains.is_empty());

        let status: Status = serde_json::from_str(
            r#"{"BackendState":"Running","TailscaleIPs":["100.101.102.103","fd7a:115c:a1e0::1"],
                "CertDomains":["aproxy.corp.ts.net"]}"#,
        )
        .unwrap();
        assert_eq!(status.tailscale_ips.len(), 2);
        assert_eq!(status.cert_domains, vec!["aproxy.corp.ts.net".to_string()]);
    }

    struct FakeDaemon {
        _dir: tempfile::TempDir,
        client: LocalApiClient,
        started: Arc<AtomicBool>,
    }

    async fn fake_daemon(initial_state: &'static str) -> FakeDaemon {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tailscaled.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let started = Arc::new(AtomicBool::new(false));

        let status_started = started.clone();
        let start_started = started.clone();
        let app = Router::new()
            .route(
                "/localapi/v0/whois",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    if q.get("addr").map(String::as_str) == Some("100.64.0.7:51234") {
                        Ok(WHOIS)
                    } else {
                        Err((StatusCode::NOT_FOUND, "no match for IP:port\n"))
                    }
                }),
            )
            .route(
                "/localapi/v0/cert/{domain}",
                get(|UrlPath(domain): UrlPath<String>| async move { format!("PEM for {domain}") }),
            )
            .route(
                "/localapi/v0/status",
                get(move || {
                    let started = status_started.clone();
                    async move {
                        let state = if started.load(Ordering::SeqCst) { "Running" } else { initial_state };
                        Json(serde_json::json!({
                            "BackendState": state,
                            "TailscaleIPs": ["100.101.102.103"],
                            "CertDomains": null
                        }))
                    }
                }),
            )
            .route(
                "/localapi/v0/start",
                post(move |Json(body): Json<serde_json::Value>| {
                    let started = start_started.clone();
                    async move {
                        assert_eq!(body["AuthKey"], "tskey-test");
                        assert_eq!(body["UpdatePrefs"]["Hostname"], "aproxy");
                        started.store(true, Ordering::SeqCst);
                        StatusCode::NO_CONTENT
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FakeDaemon {
            client: LocalApiClient::new(&path),
            _dir: dir,
            started,
        }
    }

    #[tokio::test]
    async fn whois_over_socket() {
        let daemon = fake_daemon("Running").await;
        let identity = daemon.client.whois("100.64.0.7:51234".parse().unwrap()).await.unwrap();
        assert_eq!(identity.user_name(), "alice");
    }

    #[tokio::test]
    async fn unknown_peer_is_status_error() {
        let daemon = fake_daemon("Running").await;
        let err = daemon.client.whois("100.64.0.8:1".parse().unwrap()).await.unwrap_err();
        match err {
            LocalApiError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "no match for IP:port");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn certificate_requires_server_name() {
        let daemon = fake_daemon("Running").await;
        let pem = daemon.client.certificate_pem(Some("aproxy.corp.ts.net")).await.unwrap();
        assert_eq!(pem, b"PEM for aproxy.corp.ts.net");
        assert!(daemon.client.certificate_pem(None).await.is_err());
    }

    #[tokio::test]
    async fn join_logs_in_with_auth_key() {
        let daemon = fake_daemon("NeedsLogin").await;
        let status = daemon
            .client
            .join("aproxy", Some("tskey-test"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(status.is_running());
        assert!(daemon.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn join_without_auth_key_needs_login() {
        let daemon = fake_daemon("NeedsLogin").await;
        let err = daemon.client.join("aproxy", None, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LocalApiError::NeedsLogin));
    }

    #[tokio::test]
    async fn missing_socket_is_io_error() {
        let client = LocalApiClient::new("/nonexistent/tailscaled.sock");
        assert!(matches!(client.status().await.unwrap_err(), LocalApiError::Io(_)));
    }
}
