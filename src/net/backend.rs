//! Backend address resolution and dialing.
//!
//! # Responsibilities
//! - Classify the configured backend string as a Unix socket path or a TCP
//!   `host:port` (done once at startup)
//! - Dial a fresh plain-text connection to the backend per tunnel/request
//!
//! # Design Decisions
//! - Any absolute path is a Unix socket, whether or not it exists yet
//! - TCP addresses are not validated here; a bad address fails at dial time
//! - No pooling: every caller gets its own connection

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::resilience::with_deadline;

/// Transport used to reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    UnixSocket,
    Tcp,
}

/// Where the proxy forwards traffic. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    transport: Transport,
    address: String,
}

impl BackendTarget {
    /// Classify a configured backend string.
    ///
    /// `/var/run/app.sock` → `(UnixSocket, /var/run/app.sock)`,
    /// `localhost:8080` → `(Tcp, localhost:8080)`.
    pub fn resolve(configured: &str) -> Self {
        let path = Path::new(configured);
        if path.is_absolute() {
            // `absolute` only normalizes separators and `.` components; it never touches the fs.
            let address = std::path::absolute(path)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| configured.to_string());
            return Self {
                transport: Transport::UnixSocket,
                address,
            };
        }

        Self {
            transport: Transport::Tcp,
            address: configured.to_string(),
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Value for the `Host` header when the inbound request carries none.
    pub fn authority(&self) -> &str {
        match self.transport {
            Transport::Tcp => &self.address,
            Transport::UnixSocket => "localhost",
        }
    }

    /// Open a new connection to the backend, bounded by `connect_timeout`.
    pub async fn dial(&self, connect_timeout: Duration) -> io::Result<BackendStream> {
        with_deadline("backend dial", connect_timeout, self.connect())
            .await
            .map_err(|elapsed| io::Error::new(io::ErrorKind::TimedOut, elapsed))?
    }

    async fn connect(&self) -> io::Result<BackendStream> {
        match self.transport {
            Transport::Tcp => {
                let stream = TcpStream::connect(&self.address).await?;
                stream.set_nodelay(true)?;
                Ok(BackendStream::Tcp(stream))
            }
            #[cfg(unix)]
            Transport::UnixSocket => Ok(BackendStream::Unix(UnixStream::connect(&self.address).await?)),
            #[cfg(not(unix))]
            Transport::UnixSocket => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix socket backends are not supported on this platform",
            )),
        }
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.transport {
            Transport::Tcp => write!(f, "tcp://{}", self.address),
            Transport::UnixSocket => write!(f, "unix:{}", self.address),
        }
    }
}

/// A connected backend socket of either transport.
#[derive(Debug)]
pub enum BackendStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn absolute_path_is_unix_socket() {
        let target = BackendTarget::resolve("/var/run/app.sock");
        assert_eq!(target.transport(), Transport::UnixSocket);
        assert_eq!(target.address(), "/var/run/app.sock");
    }

    #[test]
    fn missing_path_is_still_unix_socket() {
        let target = BackendTarget::resolve("/definitely/not/here.sock");
        assert_eq!(target.transport(), Transport::UnixSocket);
        assert_eq!(target.address(), "/definitely/not/here.sock");
    }

    #[test]
    fn host_port_is_tcp() {
        let target = BackendTarget::resolve("localhost:8080");
        assert_eq!(target.transport(), Transport::Tcp);
        assert_eq!(target.address(), "localhost:8080");
        assert_eq!(target.authority(), "localhost:8080");
    }

    #[test]
    fn malformed_address_is_not_rejected_up_front() {
        let target = BackendTarget::resolve("not a host");
        assert_eq!(target.transport(), Transport::Tcp);
        assert_eq!(target.address(), "not a host");
    }

    #[test]
    fn relative_path_is_tcp() {
        assert_eq!(BackendTarget::resolve("run/app.sock").transport(), Transport::Tcp);
    }

    #[test]
    fn display_names_transport() {
        assert_eq!(BackendTarget::resolve("127.0.0.1:1").to_string(), "tcp://127.0.0.1:1");
        assert_eq!(BackendTarget::resolve("/tmp/a.sock").to_string(), "unix:/tmp/a.sock");
    }

    #[tokio::test]
    async fn dials_tcp_backend() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let target = BackendTarget::resolve(&addr.to_string());
        let mut stream = target.dial(Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dials_unix_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ok").await.unwrap();
        });

        let target = BackendTarget::resolve(path.to_str().unwrap());
        assert_eq!(target.transport(), Transport::UnixSocket);
        let mut stream = target.dial(Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn unreachable_backend_fails_dial() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = BackendTarget::resolve(&addr.to_string());
        assert!(target.dial(Duration::from_secs(1)).await.is_err());
    }
}
