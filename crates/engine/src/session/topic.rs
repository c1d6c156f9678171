// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic channel to running sessions.
//!
//! The payload format belongs to the external client; the engine only
//! delivers opaque strings with a symmetric timeout.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum TopicError {
    #[error("topic send timed out after {0:?}")]
    Timeout(Duration),

    #[error("session unreachable: {0}")]
    Unreachable(String),
}

/// Sends an out-of-band payload to the session bound on `port`.
#[async_trait]
pub trait TopicClient: Send + Sync {
    async fn send(&self, port: u16, payload: &str, timeout: Duration)
        -> Result<String, TopicError>;
}

/// Raw loopback transport: connect, write the payload, read the reply
/// until the session closes the stream. Send and receive share one
/// deadline.
#[derive(Default, Clone)]
pub struct TcpTopicClient;

#[async_trait]
impl TopicClient for TcpTopicClient {
    async fn send(
        &self,
        port: u16,
        payload: &str,
        timeout: Duration,
    ) -> Result<String, TopicError> {
        let exchange = async {
            let mut stream = TcpStream::connect(("127.0.0.1", port))
                .await
                .map_err(|e| TopicError::Unreachable(e.to_string()))?;
            stream
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| TopicError::Unreachable(e.to_string()))?;
            stream.shutdown().await.map_err(|e| TopicError::Unreachable(e.to_string()))?;

            let mut response = String::new();
            stream
                .read_to_string(&mut response)
                .await
                .map_err(|e| TopicError::Unreachable(e.to_string()))?;
            Ok(response)
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TopicError::Timeout(timeout))?
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeTopicClient;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records payloads; responses and failures are scripted.
    #[derive(Clone, Default)]
    pub struct FakeTopicClient {
        inner: Arc<Mutex<FakeInner>>,
    }

    #[derive(Default)]
    struct FakeInner {
        sent: Vec<(u16, String)>,
        fail: bool,
    }

    impl FakeTopicClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<(u16, String)> {
            self.inner.lock().sent.clone()
        }

        /// Make every subsequent send fail (heartbeat-miss scripting).
        pub fn set_failing(&self, failing: bool) {
            self.inner.lock().fail = failing;
        }
    }

    #[async_trait]
    impl TopicClient for FakeTopicClient {
        async fn send(
            &self,
            port: u16,
            payload: &str,
            _timeout: Duration,
        ) -> Result<String, TopicError> {
            let mut inner = self.inner.lock();
            inner.sent.push((port, payload.to_string()));
            if inner.fail {
                Err(TopicError::Unreachable("scripted failure".into()))
            } else {
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;
