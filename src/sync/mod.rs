//! Opportunistic sync: package unsent journal entries and deliver them when
//! the network allows.
//!
//! - [`packager`] — artifact building under a size ceiling
//! - [`connectivity`] — online check
//! - [`scheduler`] — background state machine

pub mod connectivity;
pub mod packager;
pub mod scheduler;

pub use connectivity::{ConnectivityCheck, TcpConnectivity};
pub use packager::{Manifest, PackageError, Packager, SyncPackage};
pub use scheduler::{CycleOutcome, SchedulerHandle, SchedulerState, SyncFailure, SyncScheduler};
