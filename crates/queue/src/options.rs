use serde::{Deserialize, Serialize};

/// Queue-wide scheduling policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Reserved. Accepted and stored, not enforced.
    pub queue_limit: Option<usize>,
    /// Drop items from the queue once they succeed.
    pub remove_after_upload: bool,
    /// Start every item at once instead of one at a time.
    pub parallel: bool,
    /// Reserved. Failed items are never retried automatically.
    pub retry_failed_item: bool,
}
