// =============================================================================
// Monitoring — per-trade metrics and the dashboard snapshot file
// =============================================================================

pub mod performance;
pub mod snapshot;

pub use performance::{PerformanceTracker, SessionStats};
pub use snapshot::{DashboardSnapshot, PairSnapshot, SnapshotWriter};
