//! Repositories for database operations
//!
//! Each repository wraps the shared pool and exposes the operations one
//! table family needs: admin read models (targets, owners, policies), the
//! append-only attempt history, and the durable job queue.

pub mod attempt_repository;
pub mod policy_repository;
pub mod queue_repository;
pub mod target_repository;

pub use attempt_repository::{AttemptRepository, HistoryFilter, HistoryPage, PageRequest};
pub use policy_repository::PolicyRepository;
pub use queue_repository::QueueRepository;
pub use target_repository::TargetRepository;
