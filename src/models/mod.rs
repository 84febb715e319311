//! Domain models for Backhaul
//!
//! Defines backup targets, owners, retention policies, history attempts,
//! and queue job descriptors.

pub mod attempt;
pub mod job;
pub mod policy;
pub mod target;

pub use attempt::{AttemptStatus, BackupAttempt, FailureKind, TriggerSource};
pub use job::BackupJob;
pub use policy::{RetentionPolicy, Tier, TierConfig, TierSchedule};
pub use target::{Credentials, Engine, Owner, Target};
