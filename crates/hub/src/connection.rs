use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use warden_core::{Classify, ErrorClass};

/// Hub-assigned identifier of a registered connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed by peer")]
    Closed,

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

impl Classify for ConnectionError {
    fn class(&self) -> ErrorClass {
        ErrorClass::ConnectionLost
    }
}

/// Write half of a client connection.
///
/// Once registered, the hub is the only owner: it is the only caller of
/// `send` and the only caller of `close`.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn send(&mut self, text: Arc<str>) -> Result<(), ConnectionError>;

    /// Close the connection. Must not fail; errors are the transport's to log.
    async fn close(&mut self);
}
