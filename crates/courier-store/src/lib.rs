//! # Courier Store
//!
//! Durable storage for intents, attempts and the leader lease.
//!
//! [`Store`] is the logical contract the engine depends on; [`SqliteStore`]
//! implements it on SQLite with fencing-token guarded writes.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteStore;
pub use store::{
    AttemptWrite, ExecutionCandidate, InsertOutcome, ScheduleCursor, ScheduleEntry,
    ScheduleSnapshot, Store, WriteOutcome,
};
