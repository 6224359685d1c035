//! Bounded pool for buffered fetches.
//!
//! Each fetch runs in its own spawned task while holding a semaphore
//! permit, so the connection task only awaits a handle and the number of
//! fetches in flight stays bounded.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::forward::{BufferedForwarder, UpstreamError, UpstreamResponse};
use crate::session::Target;

#[derive(Debug, Clone)]
pub struct FetchPool {
    forwarder: Arc<BufferedForwarder>,
    permits: Arc<Semaphore>,
}

impl FetchPool {
    pub fn new(forwarder: BufferedForwarder, max_in_flight: usize) -> Self {
        Self {
            forwarder: Arc::new(forwarder),
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Run one fetch on the pool.
    pub async fn fetch(
        &self,
        target: Target,
        path_and_query: String,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| UpstreamError::Worker(e.to_string()))?;
        let forwarder = Arc::clone(&self.forwarder);

        let handle = tokio::spawn(async move {
            let _permit = permit;
            forwarder.fetch(&target, &path_and_query).await
        });

        // Dropping this future (shutdown) must not leave the fetch running.
        let _abort = AbortOnDrop(handle.abort_handle());
        handle.await.map_err(|e| UpstreamError::Worker(e.to_string()))?
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Aborting a finished task is a no-op, so this is safe on every path.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsConfig, UpstreamConfig};
    use crate::session::validate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn permit_released_after_fetch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await;
        });

        let forwarder =
            BufferedForwarder::new(&UpstreamConfig::default(), &LimitsConfig::default()).unwrap();
        let pool = FetchPool::new(forwarder, 2);
        let target = validate(&format!("http://{}", addr)).unwrap();

        let response = pool.fetch(target, "/".into()).await.unwrap();
        assert_eq!(response.body, b"ok");
        assert_eq!(pool.available(), 2);
    }
}
