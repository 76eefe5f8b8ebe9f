use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::{Envelope, UserSummary};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot source unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot could not be encoded: {0}")]
    Encode(String),

    #[error("snapshot source did not answer within {0:?}")]
    Timeout(Duration),
}

/// Produces the user list pushed on registration and on every broadcast
/// tick.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn users(&self) -> Result<Vec<UserSummary>, SnapshotError>;
}

/// Fetch and encode a `user_list` frame.
pub async fn encode_user_list(source: &dyn SnapshotSource) -> Result<Arc<str>, SnapshotError> {
    let users = source.users().await?;
    Envelope::user_list(users)
        .encode()
        .map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// [`encode_user_list`], giving up after `timeout`.
pub async fn encode_user_list_within(
    source: &dyn SnapshotSource,
    timeout: Duration,
) -> Result<Arc<str>, SnapshotError> {
    tokio::time::timeout(timeout, encode_user_list(source))
        .await
        .map_err(|_| SnapshotError::Timeout(timeout))?
}
