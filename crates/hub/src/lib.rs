//! `warden-hub`: real-time notification hub.
//!
//! One task owns every live connection. Everybody else (WebSocket upgrade
//! handlers, read loops, the periodic publisher, shutdown) talks to it
//! through a [`HubHandle`], which feeds a single bounded queue. Events are
//! processed one at a time in arrival order, so a connection is never written
//! from two tasks and never outlives the hub.

pub mod connection;
pub mod envelope;
pub mod hub;
pub mod publisher;
pub mod snapshot;

pub use connection::{Connection, ConnectionError, ConnectionId};
pub use envelope::{Envelope, USER_LIST, UserList, UserSummary};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubState};
pub use publisher::SnapshotPublisher;
pub use snapshot::{SnapshotError, SnapshotSource};
