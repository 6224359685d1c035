//! Direct upstream connections for the streaming relay.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::forward::UpstreamError;
use crate::session::{Scheme, Target};

/// Byte stream to an upstream, plain or TLS.
pub trait UpstreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> UpstreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Client TLS settings: webpki roots, ring provider, HTTP/1.1 ALPN.
pub fn tls_connector() -> Result<TlsConnector, UpstreamError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| UpstreamError::Client(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(TlsConnector::from(Arc::new(config)))
}

/// An open upstream connection.
///
/// Release goes through [`UpstreamConn::close`], which never fails; if the
/// owner is dropped instead (cancellation), the socket is closed on drop.
pub struct UpstreamConn {
    io: BufReader<Box<dyn UpstreamIo>>,
    peer: String,
}

impl UpstreamConn {
    /// Connect to the target, negotiating TLS for https.
    pub async fn open(target: &Target, tls: &TlsConnector) -> io::Result<Self> {
        let tcp = TcpStream::connect((target.host(), target.port())).await?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::trace!(error = %e, "Could not set TCP_NODELAY upstream");
        }

        let io: Box<dyn UpstreamIo> = match target.scheme() {
            Scheme::Http => Box::new(tcp),
            Scheme::Https => {
                let name = ServerName::try_from(target.host().to_string())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                Box::new(tls.connect(name, tcp).await?)
            }
        };

        Ok(Self {
            io: BufReader::new(io),
            peer: target.authority().to_string(),
        })
    }

    /// Buffered reader over the connection; writes pass straight through.
    pub fn io(&mut self) -> &mut BufReader<Box<dyn UpstreamIo>> {
        &mut self.io
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Best-effort close bounded by `grace`. A half-broken TLS session may
    /// never finish its shutdown, so failures and timeouts are only logged.
    pub async fn close(mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.io.get_mut().shutdown()).await {
            Ok(Ok(())) => tracing::trace!(peer = %self.peer, "Upstream closed"),
            Ok(Err(e)) => {
                tracing::debug!(peer = %self.peer, error = %e, "Upstream close failed, ignoring")
            }
            Err(_) => {
                tracing::debug!(peer = %self.peer, grace = ?grace, "Upstream close timed out, dropping")
            }
        }
    }
}
