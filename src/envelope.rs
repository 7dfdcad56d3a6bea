//! Outbound envelope construction and host identity
//!
//! The builder is a pure function of (identity, source, collected output,
//! now): no side effects, deterministic given its inputs. Envelopes are
//! created fresh each cycle and dropped after the delivery attempt.

use crate::records::{CycleOutput, LogRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::net::UdpSocket;

/// Process-wide identity stamped on every envelope
#[derive(Debug, Clone)]
pub struct Identity {
    pub app: String,
    pub ip: String,
    pub purpose: String,
}

impl Identity {
    /// Identity from the global config, with the host IP detected once
    pub fn detect(app_name: &str, purpose: &str) -> Self {
        Self {
            app: app_name.to_string(),
            ip: server_ip(),
            purpose: purpose.to_string(),
        }
    }
}

/// First non-loopback IPv4 of the host, or `unknown_ip`
///
/// Connecting a UDP socket selects the outbound interface without sending
/// any packet; the local address of that socket is the host's routable
/// IPv4.
pub fn server_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "unknown_ip".to_string())
}

/// One outbound JSON unit for the collector endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Envelope {
    pub app: String,
    pub ip: String,
    pub purpose: String,
    pub source: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogRecord>>,
    pub file_path: String,
    pub log_file_path: String,
}

/// Build the cycle's envelope, or `None` when nothing was collected
///
/// An empty cycle skips delivery entirely rather than shipping an empty
/// payload.
pub fn build(
    identity: &Identity,
    source: &str,
    output: CycleOutput,
    now: DateTime<Utc>,
) -> Option<Envelope> {
    if output.is_empty() {
        return None;
    }

    Some(Envelope {
        app: identity.app.clone(),
        ip: identity.ip.clone(),
        purpose: identity.purpose.clone(),
        source: source.to_string(),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        metrics: (!output.metrics.is_empty()).then_some(output.metrics),
        logs: (!output.logs.is_empty()).then_some(output.logs),
        file_path: path_hint(identity, source, now, false),
        log_file_path: path_hint(identity, source, now, true),
    })
}

/// One-time liveness notification sent after startup
pub fn liveness(
    identity: &Identity,
    key: &str,
    exporters: &[String],
    now: DateTime<Utc>,
) -> Value {
    json!({
        "app": identity.app,
        "ip": identity.ip,
        "purpose": identity.purpose,
        "key": key,
        "exporters": exporters,
        "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Storage-path hint for the receiver; informational only, never written
/// by the exporter itself
fn path_hint(identity: &Identity, source: &str, now: DateTime<Utc>, logs: bool) -> String {
    let date = now.format("%Y-%m-%d");
    let time = now.format("%H:%M:%S%.3f");
    if logs {
        format!(
            "metrics_collector/{}/{}/logs/{}/{}/{}.jsonl.gz",
            identity.app, identity.ip, source, date, time
        )
    } else {
        format!(
            "metrics_collector/{}/{}/{}/{}/{}.jsonl.gz",
            identity.app, identity.ip, source, date, time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Payload, Severity};
    use chrono::TimeZone;

    fn identity() -> Identity {
        Identity {
            app: "livoapp".to_string(),
            ip: "10.0.0.5".to_string(),
            purpose: "production".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_empty_cycle_builds_nothing() {
        assert!(build(&identity(), "redis", CycleOutput::default(), fixed_now()).is_none());
    }

    #[test]
    fn test_metrics_envelope_shape() {
        let mut output = CycleOutput::default();
        let mut map = Map::new();
        map.insert("status".to_string(), json!("up"));
        map.insert("uptime_seconds".to_string(), json!(3600));
        output.absorb(Payload::Metrics(map));

        let envelope = build(&identity(), "mysql", output, fixed_now()).unwrap();
        assert_eq!(envelope.app, "livoapp");
        assert_eq!(envelope.source, "mysql");
        assert_eq!(envelope.timestamp, "2026-08-05T14:30:00.000Z");
        assert_eq!(
            envelope.file_path,
            "metrics_collector/livoapp/10.0.0.5/mysql/2026-08-05/14:30:00.000.jsonl.gz"
        );
        assert_eq!(
            envelope.log_file_path,
            "metrics_collector/livoapp/10.0.0.5/logs/mysql/2026-08-05/14:30:00.000.jsonl.gz"
        );

        // Metrics envelopes carry no logs array at all.
        let wire = serde_json::to_value(&envelope).unwrap();
        assert!(wire.get("logs").is_none());
        assert_eq!(wire["metrics"]["status"], "up");
    }

    #[test]
    fn test_log_envelope_shape() {
        let mut output = CycleOutput::default();
        output.absorb(Payload::Logs(vec![LogRecord {
            source: "redis".to_string(),
            level: Severity::Error,
            message: "oops".to_string(),
            timestamp: fixed_now(),
        }]));

        let envelope = build(&identity(), "redis", output, fixed_now()).unwrap();
        let wire = serde_json::to_value(&envelope).unwrap();
        assert!(wire.get("metrics").is_none());
        assert_eq!(wire["logs"][0]["level"], "error");
        assert_eq!(wire["logs"][0]["source"], "redis");
    }

    #[test]
    fn test_builder_is_deterministic() {
        let mut output = CycleOutput::default();
        let mut map = Map::new();
        map.insert("cpu_usage_percent".to_string(), json!(12.5));
        output.absorb(Payload::Metrics(map));

        let a = build(&identity(), "linux", output.clone(), fixed_now()).unwrap();
        let b = build(&identity(), "linux", output, fixed_now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_liveness_payload() {
        let payload = liveness(
            &identity(),
            "secret-key",
            &["redis".to_string(), "linux".to_string()],
            fixed_now(),
        );
        assert_eq!(payload["app"], "livoapp");
        assert_eq!(payload["key"], "secret-key");
        assert_eq!(payload["exporters"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_server_ip_never_panics() {
        let ip = server_ip();
        assert!(!ip.is_empty());
    }
}
