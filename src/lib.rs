//! Security-posture agent: periodic host snapshots with a bounded security
//! score, kept in an encrypted local journal and delivered opportunistically.
//!
//! Modular structure:
//! - [`collectors`] — host facts behind the [`collectors::HostProbe`] seam
//! - [`scan`] — security scan and score with a cache window
//! - [`snapshot`] — resource metrics + scan merged into one sample
//! - [`storage`] — encrypted append-only journal
//! - [`sync`] — packaging, connectivity gate, background scheduler
//! - [`uplink`] — email and webhook delivery
//! - [`logging`] — structured logging and log retention

pub mod config;
pub mod collectors;
pub mod scan;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod uplink;
pub mod logging;

pub use config::{AgentConfig, ConfigStore};
pub use collectors::{HostProbe, SysinfoProbe};
pub use scan::{ScanEngine, SecurityScanResult};
pub use snapshot::{SnapshotCollector, SystemSnapshot};
pub use storage::Journal;
pub use sync::{Packager, SyncScheduler};
pub use uplink::Transport;
pub use logging::StructuredLogger;
