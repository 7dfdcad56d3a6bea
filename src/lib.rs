/// Error types for the exporter agent
pub mod error;

/// Record, payload, and severity types shared by all exporters
pub mod records;

/// Static configuration loaded at startup
pub mod config;

/// Wall-clock-aligned cycle scheduling
pub mod schedule;

/// Time cursors bounding incremental collection windows
pub mod cursor;

/// Byte-offset tailing of growing log files
pub mod tail;

/// Rolling sample windows for smoothed aggregate metrics
pub mod history;

/// Outbound envelope construction and host identity
pub mod envelope;

/// HTTP delivery to the collector endpoint
pub mod deliver;

/// The generic exporter engine and source collector contract
pub mod exporter;

/// Per-backend source collectors
pub mod collectors;

// Re-export commonly used types
pub use error::{CollectorError, ConfigError, DeliveryError};
pub use exporter::{Exporter, SourceCollector};
pub use records::{LogRecord, Payload, Severity};
