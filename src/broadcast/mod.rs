//! # LE Broadcast Manager Data
//!
//! BIS sync bookkeeping of the broadcast sink: what the assistant requested,
//! what the sink is trying to sync to, and the states kept across a pause or
//! an in-flight BIG sync.

pub mod bis_sync;
pub mod manager_data;

pub use bis_sync::BisSyncState;
pub use manager_data::{BroadcastManagerData, BroadcastSourceRecord};
