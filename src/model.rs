//! Data model shared by probes, the aggregator, the cache and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user's open handle on one file, as reported by a probe.
///
/// `file_path` keeps the source-native representation (UNC or local);
/// comparisons always go through `pathmap::normalize_path`. `session_id`
/// and `file_id` stay 0 when the source does not report them, and
/// `opened_at` is the observation time for sources that do not report a
/// real open time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFileRecord {
    pub file_path: String,
    pub user_name: String,
    pub client_name: String,
    pub access_mode: String,
    pub opened_at: DateTime<Utc>,
    pub session_id: i64,
    pub file_id: i64,
}

impl OpenFileRecord {
    /// A record without a path or user carries no answer to "who has this
    /// open" and never enters a snapshot.
    pub fn is_valid(&self) -> bool {
        !self.file_path.trim().is_empty() && !self.user_name.trim().is_empty()
    }
}

/// Immutable result of one aggregation cycle. Installed into the cache as
/// a unit; readers see either the previous snapshot or this one, never a
/// partial merge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub records: Vec<OpenFileRecord>,
    pub captured_at: DateTime<Utc>,
}

/// Point-query result: everyone currently holding one file open.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUsers {
    pub file_path: String,
    pub users: Vec<OpenFileRecord>,
    pub last_updated: DateTime<Utc>,
    pub user_count: usize,
}

/// One row of the "at a glance" active-files view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveFileSummary {
    pub file_path: String,
    pub user_count: usize,
    pub last_access: DateTime<Utc>,
}
