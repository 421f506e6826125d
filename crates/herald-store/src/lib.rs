//! `herald-store`: SQLite persistence for tasks, their run history and the
//! feed results produced by topic tasks.
//!
//! One [`TaskStore`] wraps one connection behind a mutex; every public method
//! is a single unit of work that takes the lock, runs its statements (inside a
//! transaction when there is more than one write) and releases the lock on
//! return, whatever the outcome.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::TaskStore;
pub use types::{
    FeedItem, FeedResult, NewTask, Run, RunOutcome, RunStatus, Task, TaskKind, TaskUpdate,
    TriggerSpec,
};
