//! Canopy extension orchestration: drives extension resources through
//! reconcile, delete, migrate and restore, and decides backup copies during
//! a control-plane migration.

#![forbid(unsafe_code)]

pub mod backup;
pub mod deployer;
pub mod driver;
pub mod migration;

pub use backup::{is_backup_copy_required, BackupCopyRequest};
pub use deployer::{ExtensionDeployer, GenericDeployer};
pub use driver::LifecycleDriver;
pub use migration::{
    await_migrated, capture_state, destroy_all, migrate_all, reconcile_all, request_migration,
    restore_all, wait_cleanup_all,
};
