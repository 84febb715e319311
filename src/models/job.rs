//! Job descriptors carried by the durable queue

use serde::{Deserialize, Serialize};

use super::{Tier, TriggerSource};

/// A queued unit of backup work
///
/// Jobs reference an already-created pending attempt; everything else a
/// worker needs (credentials, policy) is re-resolved at execution time
/// rather than trusted from the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    /// Queue row id
    pub id: i64,

    /// The pending attempt this job executes
    pub attempt_id: String,

    /// Target to back up
    pub target_id: String,

    /// Tier the attempt is tagged with
    pub tier: Tier,

    /// What created the attempt
    pub trigger: TriggerSource,

    /// How many times this job has been delivered (1 on first delivery)
    pub delivery_count: i64,
}
