use serde::{Deserialize, Serialize};

/// Read-only view of a backup entry: which bucket holds the backups and
/// whether this is the source-side copy left behind by a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntryRef {
    pub name: String,
    pub bucket_name: String,
    #[serde(default)]
    pub is_source: bool,
}

/// Prefix of the backup entry that keeps pointing at the source bucket during a restore.
pub const SOURCE_ENTRY_PREFIX: &str = "source-";

pub fn source_entry_name(entry_name: &str) -> String {
    format!("{}{}", SOURCE_ENTRY_PREFIX, entry_name)
}
