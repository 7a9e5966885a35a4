//! Canopy core types: the extension resource model, health conditions, the
//! error taxonomy and the client/lister seams the orchestrator is written against.

#![forbid(unsafe_code)]

pub mod backup;
pub mod client;
pub mod clock;
pub mod codes;
pub mod condition;
pub mod config;
pub mod error;
pub mod extension;
pub mod state;

pub use backup::BackupEntryRef;
pub use client::{BackupEntryReader, ReadinessResource, ResourceClient, WorkloadLister};
pub use clock::{Clock, FixedClock, SystemClock};
pub use codes::ErrorCode;
pub use condition::{Condition, ConditionStatus};
pub use config::{CanopyConfig, ConditionThresholds};
pub use error::{ClientError, Error};
pub use extension::{
    ControlPlane, Extension, ExtensionKind, ExtensionPhase, ExtensionStatus, Infrastructure,
    LastError, LastOperation, LastOperationState, LastOperationType, Network, ObjectKey,
    OperationRequest, Worker,
};
pub use state::{ExtensionState, ShootState};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod prelude {
    pub use super::{
        Clock, Condition, ConditionStatus, Error, ErrorCode, Extension, ExtensionKind,
        ExtensionStatus, LastOperation, LastOperationState, LastOperationType, ObjectKey,
        OperationRequest, ResourceClient, Result,
    };
}
