//! Periodic `user_list` broadcasts.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::hub::{HubError, HubHandle, HubState};

/// Re-broadcasts the snapshot on a fixed interval until the hub leaves
/// `Running`.
#[derive(Debug)]
pub struct SnapshotPublisher {
    hub: HubHandle,
    interval: Duration,
}

impl SnapshotPublisher {
    pub fn new(hub: HubHandle, interval: Duration) -> Self {
        Self { hub, interval }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; registrations already carry a
        // fresh snapshot.
        ticker.tick().await;

        let mut state = self.hub.subscribe_state();
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.hub.publish_snapshot().await {
                    Ok(()) => {}
                    Err(HubError::ShuttingDown | HubError::Stopped) => break,
                    Err(err) => warn!(error = %err, "periodic snapshot failed"),
                },
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow() != HubState::Running {
                        break;
                    }
                }
            }
        }

        debug!("snapshot publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::connection::{Connection, ConnectionError};
    use crate::envelope::UserSummary;
    use crate::hub::{Hub, HubConfig};
    use crate::snapshot::{SnapshotError, SnapshotSource};

    struct Empty;

    #[async_trait]
    impl SnapshotSource for Empty {
        async fn users(&self) -> Result<Vec<UserSummary>, SnapshotError> {
            Ok(Vec::new())
        }
    }

    struct Recorder(Arc<Mutex<usize>>);

    #[async_trait]
    impl Connection for Recorder {
        async fn send(&mut self, _text: Arc<str>) -> Result<(), ConnectionError> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_every_interval_and_stops_with_the_hub() {
        let (hub, _join) = Hub::spawn(Arc::new(Empty), HubConfig::default());
        let frames = Arc::new(Mutex::new(0));
        hub.register(Box::new(Recorder(frames.clone()))).await.unwrap();
        assert_eq!(*frames.lock().unwrap(), 1);

        let publisher = SnapshotPublisher::new(hub.clone(), Duration::from_secs(5)).spawn();

        tokio::time::sleep(Duration::from_secs(16)).await;
        hub.live_count().await.unwrap();
        assert_eq!(*frames.lock().unwrap(), 4);

        hub.shutdown().await;
        publisher.await.unwrap();
    }
}
