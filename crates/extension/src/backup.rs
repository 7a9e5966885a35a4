//! Whether etcd backups must be copied from the source seed's bucket before
//! the control plane is restored on the destination seed.

use canopy_core::backup::source_entry_name;
use canopy_core::{BackupEntryReader, Error, Result, WorkloadLister};
use tracing::{debug, info};

/// Name of the primary etcd whose presence means the data already lives on the destination.
pub const PRIMARY_ETCD: &str = "etcd-main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCopyRequest {
    /// The shoot is currently being restored on this seed.
    pub restoring: bool,
    /// The destination seed has backup storage configured.
    pub backup_configured: bool,
    /// Control-plane namespace on the destination seed.
    pub namespace: String,
    /// Name of the shoot's backup entry.
    pub entry_name: String,
    /// Bucket identifier owned by the destination seed.
    pub destination_bucket: String,
}

/// Decide whether backups must be copied.
///
/// Returns `true` only when the primary etcd does not exist yet and the
/// source-side entry points at a bucket other than the destination's. If the
/// source- and destination-side entries reference the same bucket, ownership
/// cannot be decided and [`Error::AmbiguousMigration`] is returned.
pub async fn is_backup_copy_required(
    lister: &dyn WorkloadLister,
    entries: &dyn BackupEntryReader,
    req: &BackupCopyRequest,
) -> Result<bool> {
    if !req.restoring {
        debug!("not restoring; no copy");
        return Ok(false);
    }
    if !req.backup_configured {
        debug!("no backup storage on destination; no copy");
        return Ok(false);
    }
    let etcds = lister.etcds(&req.namespace).await?;
    if etcds.iter().any(|e| e.name == PRIMARY_ETCD) {
        debug!(namespace = %req.namespace, "primary etcd already present; no copy");
        return Ok(false);
    }

    let source = entries.backup_entry(&source_entry_name(&req.entry_name)).await?;
    let destination = entries.backup_entry(&req.entry_name).await?;
    let Some(source) = source else {
        debug!(entry = %req.entry_name, "no source-side backup entry; no copy");
        return Ok(false);
    };
    if let Some(dest) = &destination {
        if dest.bucket_name == source.bucket_name {
            return Err(Error::AmbiguousMigration { bucket: source.bucket_name });
        }
    }
    let required = source.bucket_name != req.destination_bucket;
    info!(source_bucket = %source.bucket_name, destination_bucket = %req.destination_bucket, required, "backup copy decision");
    Ok(required)
}
