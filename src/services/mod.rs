//! Administrative and observability facades over the core pipeline

mod admin;
mod alert;

pub use admin::{AdminService, BulkDeleteSummary};
pub use alert::{AlertService, TargetAlert, ALERT_THRESHOLD};
