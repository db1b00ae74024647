pub mod health;
pub mod scaled;
pub mod snapshot;

pub use health::HealthMetrics;
pub use snapshot::SnapshotExporter;
