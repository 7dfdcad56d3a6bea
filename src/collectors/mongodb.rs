//! MongoDB server status and API log stats
//!
//! Samples `db.serverStatus()` through the `mongosh` client binary and
//! extracts connection, memory, and opcounter fields. The same cycle also
//! counts API request logs in the `logs` collection (total, current hour,
//! current-hour success rate). Unreachable servers ship the fully zeroed
//! placeholder with `status: "down"`.

use super::run_capture;
use crate::error::CollectorError;
use crate::exporter::SourceCollector;
use crate::records::Payload;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use log::warn;
use serde_json::{json, Map, Value};
use std::process::Command;

pub struct MongoStatusCollector {
    uri: String,
    db: String,
}

impl MongoStatusCollector {
    pub fn new(uri: &str, db: &str) -> Self {
        Self {
            uri: uri.to_string(),
            db: db.to_string(),
        }
    }

    fn eval(&self, script: &str) -> Result<String, CollectorError> {
        run_capture(Command::new("mongosh").args([
            self.uri.as_str(),
            "--quiet",
            "--eval",
            script,
        ]))
    }

    fn fetch_server_status(&self) -> Result<Value, CollectorError> {
        let script = format!(
            "JSON.stringify(db.getSiblingDB('{}').serverStatus())",
            self.db
        );
        let output = self.eval(&script)?;
        serde_json::from_str(output.trim())
            .map_err(|e| CollectorError::ParseError(format!("serverStatus: {}", e)))
    }

    fn fetch_api_log_stats(&self, now: DateTime<Utc>) -> Result<Value, CollectorError> {
        let hour_start = start_of_hour(now).to_rfc3339_opts(SecondsFormat::Millis, true);
        let script = format!(
            "const c = db.getSiblingDB('{db}').logs; JSON.stringify({{\
               total: c.countDocuments({{}}),\
               hour: c.countDocuments({{date: {{$gte: new Date('{start}')}}}}),\
               success: c.countDocuments({{date: {{$gte: new Date('{start}')}}, status: 200}})\
             }})",
            db = self.db,
            start = hour_start,
        );
        let output = self.eval(&script)?;
        serde_json::from_str(output.trim())
            .map_err(|e| CollectorError::ParseError(format!("api log stats: {}", e)))
    }
}

fn start_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn num(root: &Value, path: &[&str]) -> f64 {
    let mut current = root;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return 0.0,
        }
    }
    current.as_f64().unwrap_or(0.0)
}

/// Extract the exported field set from a `serverStatus` document
pub fn extract_metrics(status: &Value) -> Map<String, Value> {
    let mut metrics = Map::new();
    metrics.insert("status".to_string(), json!("up"));
    metrics.insert("uptime_seconds".to_string(), json!(num(status, &["uptime"])));
    metrics.insert(
        "connections_current".to_string(),
        json!(num(status, &["connections", "current"])),
    );
    metrics.insert(
        "connections_available".to_string(),
        json!(num(status, &["connections", "available"])),
    );
    metrics.insert(
        "mem_resident_mb".to_string(),
        json!(num(status, &["mem", "resident"])),
    );
    metrics.insert(
        "mem_virtual_mb".to_string(),
        json!(num(status, &["mem", "virtual"])),
    );
    metrics.insert(
        "mem_mapped_mb".to_string(),
        json!(num(status, &["mem", "mapped"])),
    );
    for op in ["insert", "query", "update", "delete", "getmore", "command"] {
        metrics.insert(
            format!("opcounters_{}", op),
            json!(num(status, &["opcounters", op])),
        );
    }
    metrics
}

/// Zeroed field set shipped when the server is unreachable
pub fn placeholder() -> Map<String, Value> {
    let mut metrics = extract_metrics(&json!({}));
    metrics.insert("status".to_string(), json!("down"));
    metrics
}

/// Shape the API log counters the way the receiver expects them
pub fn api_log_stats(counts: &Value) -> Value {
    let total = num(counts, &["total"]);
    let hour = num(counts, &["hour"]);
    let success = num(counts, &["success"]);

    let success_rate = if hour > 0.0 {
        format!("{:.2}", success / hour * 100.0)
    } else {
        "0.00".to_string()
    };

    json!({
        "total_api_logs": total,
        "requests_current_hour": hour,
        "response_success_rate_current_hour": success_rate,
    })
}

impl SourceCollector for MongoStatusCollector {
    fn source(&self) -> String {
        "mongodb".to_string()
    }

    fn preflight(&mut self) -> Result<(), CollectorError> {
        run_capture(Command::new("mongosh").arg("--version")).map(|_| ())
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let mut metrics = match self.fetch_server_status() {
            Ok(status) => extract_metrics(&status),
            Err(e) => {
                warn!("mongodb: serverStatus failed, exporting down placeholder: {}", e);
                return Ok(Payload::Metrics(placeholder()));
            }
        };

        match self.fetch_api_log_stats(Utc::now()) {
            Ok(counts) => {
                metrics.insert("api_log_stats".to_string(), api_log_stats(&counts));
            }
            Err(e) => warn!("mongodb: api log stats unavailable this cycle: {}", e),
        }

        Ok(Payload::Metrics(metrics))
    }
}
