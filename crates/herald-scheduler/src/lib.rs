//! `herald-scheduler`: live job registry and firing engine for stored tasks.
//!
//! # Overview
//!
//! Tasks live in the store; the [`registry::JobRegistry`] holds one live job
//! per active task, built from its compiled [`trigger::Trigger`]. The
//! [`engine::SchedulerEngine`] ticks every second and hands due jobs to a
//! [`engine::JobDispatcher`], in production the [`executor::Executor`], which
//! runs the task and records a Run.
//!
//! # Trigger variants
//!
//! | Variant    | Behaviour                                                   |
//! |------------|-------------------------------------------------------------|
//! | `Interval` | First fire after a short delay, then exactly every N secs   |
//! | `Cron`     | 5-field crontab line in the configured timezone             |
//!
//! Missed fires are coalesced, fires later than the misfire grace are
//! dropped, and a task never runs twice at once.

pub mod engine;
pub mod error;
pub mod executor;
pub mod reconcile;
pub mod registry;
pub mod trigger;

pub use engine::{JobDispatcher, SchedulerEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use executor::{Executor, NotifyTarget};
pub use reconcile::{reconcile, ReconcileReport};
pub use registry::{JobRegistry, ScheduledJob};
pub use trigger::{describe, format_local, CronPreview, Trigger, TriggerContext};
