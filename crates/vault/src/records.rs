use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Description stored next to each archive as `<archive_id>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub archive_id: String,
    pub vault_name: String,
    #[serde(default)]
    pub description: String,
    pub size: u64,
    /// Hex tree-hash of the archive contents.
    pub checksum: String,
    pub part_size: u64,
    pub created_at: DateTime<Utc>,
}
