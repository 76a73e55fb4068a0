//! Lease types, the pure state machine, and the manager that commits
//! transitions through a storage backend.

pub mod machine;
pub mod manager;
pub mod types;

pub use machine::{admit_write, LeasePolicy};
pub use manager::{LeaseBreak, LeaseGrant, LeaseManager};
pub use types::{
    BreakPeriod, LeaseDuration, LeaseId, LeaseProperties, LeaseRecord, LeaseState, LeaseStatus,
};
