//! Canopy health engine: turns live workloads, nodes and extension reports
//! into the shoot conditions, with hysteresis and staleness rules applied.

#![forbid(unsafe_code)]

pub mod engine;
pub mod extensions;
pub mod hysteresis;
pub mod nodes;
pub mod profile;
pub mod workloads;

pub use engine::HealthEngine;
pub use extensions::{check_extension_condition, collect_reports, reports_from, ExtensionReport};
pub use hysteresis::{failed_condition, pardon_condition};
pub use profile::{Features, PoolProfile, Purpose, ShootProfile};
pub use workloads::Verdict;
