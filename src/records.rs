//! Record and payload types shared by all exporters
//!
//! Every exporter normalizes its source-specific observations into these
//! types before the envelope is built. Records are immutable once produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Severity of a filtered log line, derived from the matched keyword
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Warning-class line
    Warn,
    /// Error-class line
    Error,
}

/// A single filtered log line with its origin and severity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    /// Source tag (e.g. "redis", "mysql")
    pub source: String,
    /// Severity derived from the matched keyword
    pub level: Severity,
    /// The raw log line
    pub message: String,
    /// When the line was collected
    pub timestamp: Timestamp,
}

/// What one source collector produced in a single cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Aggregate metric fields, keyed by metric name
    Metrics(Map<String, Value>),
    /// A keyed record batch, rendered as `metrics: { <key>: [...] }`
    Records { key: String, records: Vec<Value> },
    /// Filtered log lines, rendered as a top-level `logs` array
    Logs(Vec<LogRecord>),
}

impl Payload {
    /// Whether this payload carries nothing worth delivering
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Metrics(map) => map.is_empty(),
            Payload::Records { records, .. } => records.is_empty(),
            Payload::Logs(logs) => logs.is_empty(),
        }
    }
}

/// All payloads collected in one cycle, merged for a single delivery
///
/// Multi-source exporters absorb every sub-source contribution before the
/// envelope is built, so exactly one delivery call happens per cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleOutput {
    /// Merged aggregate metrics and keyed record batches
    pub metrics: Map<String, Value>,
    /// Merged log batches
    pub logs: Vec<LogRecord>,
}

impl CycleOutput {
    /// Merge one collector's payload into the cycle output
    ///
    /// Metric maps extend the merged map; record batches with the same key
    /// concatenate in collection order; log batches concatenate. Empty
    /// payloads contribute nothing, so a quiet cycle still skips delivery.
    pub fn absorb(&mut self, payload: Payload) {
        if payload.is_empty() {
            return;
        }
        match payload {
            Payload::Metrics(map) => {
                self.metrics.extend(map);
            }
            Payload::Records { key, records } => {
                match self.metrics.get_mut(&key) {
                    Some(Value::Array(existing)) => existing.extend(records),
                    _ => {
                        self.metrics.insert(key, Value::Array(records));
                    }
                }
            }
            Payload::Logs(logs) => {
                self.logs.extend(logs);
            }
        }
    }

    /// Whether the cycle collected nothing
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.logs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_record_serialization() {
        let record = LogRecord {
            source: "redis".to_string(),
            level: Severity::Error,
            message: "1:M 05 Aug 2026 10:00:00.000 # Error accepting a client".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let deserialized: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, deserialized);
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"error\"");
        assert_eq!(serde_json::to_string(&Severity::Warn).unwrap(), "\"warn\"");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Warn < Severity::Error);
    }

    #[test]
    fn test_payload_is_empty() {
        assert!(Payload::Metrics(Map::new()).is_empty());
        assert!(Payload::Records {
            key: "api_logs".to_string(),
            records: vec![],
        }
        .is_empty());
        assert!(Payload::Logs(vec![]).is_empty());

        let mut map = Map::new();
        map.insert("status".to_string(), json!("up"));
        assert!(!Payload::Metrics(map).is_empty());
    }

    #[test]
    fn test_absorb_metrics_extend() {
        let mut output = CycleOutput::default();

        let mut first = Map::new();
        first.insert("uptime_seconds".to_string(), json!(120));
        output.absorb(Payload::Metrics(first));

        let mut second = Map::new();
        second.insert("avg_query_time_ms".to_string(), json!(1.5));
        output.absorb(Payload::Metrics(second));

        assert_eq!(output.metrics.len(), 2);
        assert_eq!(output.metrics["uptime_seconds"], json!(120));
        assert_eq!(output.metrics["avg_query_time_ms"], json!(1.5));
    }

    #[test]
    fn test_absorb_records_concatenate_same_key() {
        let mut output = CycleOutput::default();

        output.absorb(Payload::Records {
            key: "api_logs".to_string(),
            records: vec![json!({"endpoint": "/a"})],
        });
        output.absorb(Payload::Records {
            key: "api_logs".to_string(),
            records: vec![json!({"endpoint": "/b"}), json!({"endpoint": "/c"})],
        });

        let batch = output.metrics["api_logs"].as_array().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0]["endpoint"], "/a");
        assert_eq!(batch[2]["endpoint"], "/c");
    }

    #[test]
    fn test_absorb_records_distinct_keys() {
        let mut output = CycleOutput::default();

        output.absorb(Payload::Records {
            key: "mongo_slow_queries".to_string(),
            records: vec![json!({"millis": 250})],
        });
        output.absorb(Payload::Records {
            key: "mysql_slow_queries".to_string(),
            records: vec![json!({"query_time": "00:00:03"})],
        });

        assert_eq!(output.metrics.len(), 2);
        assert_eq!(
            output.metrics["mongo_slow_queries"].as_array().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_absorb_logs_concatenate() {
        let mut output = CycleOutput::default();
        let record = LogRecord {
            source: "mysql".to_string(),
            level: Severity::Warn,
            message: "warning line".to_string(),
            timestamp: Utc::now(),
        };

        output.absorb(Payload::Logs(vec![record.clone()]));
        output.absorb(Payload::Logs(vec![record.clone(), record]));

        assert_eq!(output.logs.len(), 3);
    }

    #[test]
    fn test_cycle_output_empty() {
        let mut output = CycleOutput::default();
        assert!(output.is_empty());

        output.absorb(Payload::Metrics(Map::new()));
        assert!(output.is_empty());

        // An empty record batch must not materialize an empty array.
        output.absorb(Payload::Records {
            key: "api_logs".to_string(),
            records: vec![],
        });
        assert!(output.is_empty());

        output.absorb(Payload::Logs(vec![LogRecord {
            source: "redis".to_string(),
            level: Severity::Error,
            message: "x".to_string(),
            timestamp: Utc::now(),
        }]));
        assert!(!output.is_empty());
    }
}
