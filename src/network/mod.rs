//! Replication Layer
//!
//! Wire messages between the authority and its replicas. Nothing here
//! touches a socket; transport belongs to the caller.

pub mod protocol;
pub mod replication;

pub use protocol::{
    CheckLineEvent, KartFinishedEvent, ReplicationError, ReplicationMessage,
};
pub use replication::{ProgressSnapshot, SNAPSHOT_VERSION};
