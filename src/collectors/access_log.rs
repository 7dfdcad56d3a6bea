//! nginx access logs and MongoDB request-log collections
//!
//! Both sources are time-indexed: each owns a cursor that starts a
//! configured window back and advances strictly past the newest record it
//! exports, so interleaved cycles neither re-deliver nor skip. Line
//! parsing is an isolated pure function that fails closed: an unparseable
//! line yields no record, never an error.

use super::run_capture;
use crate::cursor::TimeCursor;
use crate::error::CollectorError;
use crate::exporter::SourceCollector;
use crate::records::Payload;
use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use regex::Regex;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::Command;

/// Combined log format:
/// `$remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent "$http_referer" "$http_user_agent"`
const COMBINED_PATTERN: &str = r#"^(?P<remote_addr>\S+) - (?P<remote_user>\S+) \[(?P<time_local>[^\]]+)\] "(?P<request>[^"]*)" (?P<status>\d{3}) (?P<bytes>\d+|-) "[^"]*" "(?P<agent>[^"]*)""#;

/// One parsed access-log entry
#[derive(Debug, Clone, PartialEq)]
pub struct AccessEntry {
    pub remote_addr: String,
    pub method: String,
    pub endpoint: String,
    pub status: u16,
    pub user_agent: String,
    pub bytes_sent: u64,
    pub timestamp: DateTime<Utc>,
}

impl AccessEntry {
    fn into_record(self) -> Value {
        json!({
            "remote_addr": self.remote_addr,
            "method": self.method,
            "endpoint": self.endpoint,
            "status": self.status,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "user_agent": self.user_agent,
            "bytes_sent": self.bytes_sent,
            "source": "nginx",
        })
    }
}

/// Parse one combined-format line; `None` on any mismatch
pub fn parse_access_line(pattern: &Regex, line: &str) -> Option<AccessEntry> {
    let captures = pattern.captures(line)?;

    let timestamp = DateTime::parse_from_str(&captures["time_local"], "%d/%b/%Y:%H:%M:%S %z")
        .ok()?
        .with_timezone(&Utc);

    let request = &captures["request"];
    let mut parts = request.split(' ');
    let method = parts.next().filter(|m| !m.is_empty()).unwrap_or("UNKNOWN");
    let endpoint = parts.next().unwrap_or("UNKNOWN");

    Some(AccessEntry {
        remote_addr: captures["remote_addr"].to_string(),
        method: method.to_string(),
        endpoint: endpoint.to_string(),
        status: captures["status"].parse().ok()?,
        user_agent: captures["agent"].to_string(),
        bytes_sent: captures["bytes"].parse().unwrap_or(0),
        timestamp,
    })
}

/// Windowed reader of an nginx access log
pub struct NginxAccessCollector {
    path: PathBuf,
    pattern: Regex,
    cursor: TimeCursor,
    max_logs: usize,
}

impl NginxAccessCollector {
    pub fn new(path: PathBuf, window_minutes: i64, max_logs: usize) -> Self {
        Self {
            path,
            pattern: Regex::new(COMBINED_PATTERN).expect("combined log pattern is valid"),
            cursor: TimeCursor::starting_back(window_minutes),
            max_logs,
        }
    }

    #[cfg(test)]
    fn with_cursor(mut self, cursor: TimeCursor) -> Self {
        self.cursor = cursor;
        self
    }
}

impl SourceCollector for NginxAccessCollector {
    fn source(&self) -> String {
        "nginx".to_string()
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("nginx: access log {} absent", self.path.display());
                return Ok(Payload::Records {
                    key: "api_logs".to_string(),
                    records: Vec::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<AccessEntry> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Some(entry) = parse_access_line(&self.pattern, &line) {
                if self.cursor.includes(entry.timestamp) {
                    entries.push(entry);
                }
            }
        }

        if entries.len() > self.max_logs {
            let dropped = entries.len() - self.max_logs;
            warn!("nginx: dropping {} oldest access records over cap", dropped);
            entries.drain(..dropped);
        }

        if let Some(last) = entries.iter().map(|e| e.timestamp).max() {
            self.cursor.advance_past(last);
        }

        Ok(Payload::Records {
            key: "api_logs".to_string(),
            records: entries.into_iter().map(AccessEntry::into_record).collect(),
        })
    }
}

/// Windowed reader of a MongoDB request-log collection
pub struct MongooseLogCollector {
    uri: String,
    collection: String,
    cursor: TimeCursor,
    max_logs: usize,
}

impl MongooseLogCollector {
    pub fn new(uri: &str, collection: &str, window_minutes: i64, max_logs: usize) -> Self {
        Self {
            uri: uri.to_string(),
            collection: collection.to_string(),
            cursor: TimeCursor::starting_back(window_minutes),
            max_logs,
        }
    }

    fn fetch(&self) -> Result<Value, CollectorError> {
        let cutoff = self.cursor.cutoff().to_rfc3339_opts(SecondsFormat::Millis, true);
        let script = format!(
            "JSON.stringify(db['{coll}'].find({{date: {{$gt: new Date('{cutoff}')}}}})\
             .sort({{date: 1}}).limit({limit}).toArray())",
            coll = self.collection,
            cutoff = cutoff,
            limit = self.max_logs,
        );
        let output = run_capture(Command::new("mongosh").args([
            self.uri.as_str(),
            "--quiet",
            "--eval",
            script.as_str(),
        ]))?;
        serde_json::from_str(output.trim())
            .map_err(|e| CollectorError::ParseError(format!("request log query: {}", e)))
    }
}

/// Normalize fetched documents into records and find the newest timestamp
///
/// Documents without a parseable `date` are dropped (fail closed).
pub fn map_request_docs(docs: &Value) -> (Vec<Value>, Option<DateTime<Utc>>) {
    let Some(array) = docs.as_array() else {
        return (Vec::new(), None);
    };

    let mut records = Vec::new();
    let mut newest: Option<DateTime<Utc>> = None;

    for doc in array {
        let Some(date) = doc
            .get("date")
            .and_then(Value::as_str)
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        else {
            continue;
        };
        let timestamp = date.with_timezone(&Utc);

        let mut record = doc.clone();
        if let Some(fields) = record.as_object_mut() {
            fields.insert(
                "timestamp".to_string(),
                json!(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            fields.insert("source".to_string(), json!("mongoose"));
        }
        records.push(record);

        newest = Some(match newest {
            Some(current) if current >= timestamp => current,
            _ => timestamp,
        });
    }

    (records, newest)
}

impl SourceCollector for MongooseLogCollector {
    fn source(&self) -> String {
        "mongoose".to_string()
    }

    fn preflight(&mut self) -> Result<(), CollectorError> {
        run_capture(Command::new("mongosh").arg("--version")).map(|_| ())
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let docs = self.fetch()?;
        let (records, newest) = map_request_docs(&docs);

        if let Some(last) = newest {
            self.cursor.advance_past(last);
        }

        Ok(Payload::Records {
            key: "api_logs".to_string(),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pattern() -> Regex {
        Regex::new(COMBINED_PATTERN).unwrap()
    }

    const LINE: &str = r#"203.0.113.9 - frank [05/Aug/2026:14:30:00 +0000] "GET /api/v1/users HTTP/1.1" 200 612 "-" "curl/8.5.0""#;

    #[test]
    fn test_parse_access_line() {
        let entry = parse_access_line(&pattern(), LINE).unwrap();
        assert_eq!(entry.remote_addr, "203.0.113.9");
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.endpoint, "/api/v1/users");
        assert_eq!(entry.status, 200);
        assert_eq!(entry.bytes_sent, 612);
        assert_eq!(entry.user_agent, "curl/8.5.0");
        assert_eq!(
            entry.timestamp,
            Utc.with_ymd_and_hms(2026, 8, 5, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_access_line_fails_closed() {
        assert!(parse_access_line(&pattern(), "").is_none());
        assert!(parse_access_line(&pattern(), "not an access log line").is_none());
        // Bad timestamp inside an otherwise valid line.
        let bad = LINE.replace("05/Aug/2026", "99/Xyz/2026");
        assert!(parse_access_line(&pattern(), &bad).is_none());
    }

    #[test]
    fn test_parse_access_line_empty_request() {
        let line = r#"203.0.113.9 - - [05/Aug/2026:14:30:00 +0000] "" 400 0 "-" "-""#;
        let entry = parse_access_line(&pattern(), line).unwrap();
        assert_eq!(entry.method, "UNKNOWN");
        assert_eq!(entry.endpoint, "UNKNOWN");
    }

    fn write_log(lines: &[(&str, u32)]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for (time, status) in lines {
            writeln!(
                file,
                r#"10.0.0.1 - - [{time}] "GET /x HTTP/1.1" {status} 100 "-" "test""#,
            )
            .unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_collect_windows_by_cursor_and_advances() {
        let file = write_log(&[
            ("05/Aug/2026:14:00:00 +0000", 200),
            ("05/Aug/2026:14:10:00 +0000", 200),
            ("05/Aug/2026:14:20:00 +0000", 500),
        ]);

        let cutoff = Utc.with_ymd_and_hms(2026, 8, 5, 14, 5, 0).unwrap();
        let mut collector = NginxAccessCollector::new(file.path().to_path_buf(), 30, 100)
            .with_cursor(TimeCursor::at(cutoff));

        let payload = collector.collect().unwrap();
        let Payload::Records { records, .. } = payload else {
            panic!("expected records");
        };
        // Only the two entries past the cutoff.
        assert_eq!(records.len(), 2);

        // The cursor advanced: a second poll over the unchanged file is
        // empty, nothing is re-delivered.
        let payload = collector.collect().unwrap();
        let Payload::Records { records, .. } = payload else {
            panic!("expected records");
        };
        assert!(records.is_empty());
    }

    #[test]
    fn test_collect_caps_batch_keeping_recent() {
        let file = write_log(&[
            ("05/Aug/2026:14:01:00 +0000", 200),
            ("05/Aug/2026:14:02:00 +0000", 200),
            ("05/Aug/2026:14:03:00 +0000", 200),
        ]);

        let cutoff = Utc.with_ymd_and_hms(2026, 8, 5, 14, 0, 0).unwrap();
        let mut collector = NginxAccessCollector::new(file.path().to_path_buf(), 30, 2)
            .with_cursor(TimeCursor::at(cutoff));

        let Payload::Records { records, .. } = collector.collect().unwrap() else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["timestamp"], "2026-08-05T14:02:00.000Z");
    }

    #[test]
    fn test_collect_missing_file_is_empty_not_error() {
        let mut collector =
            NginxAccessCollector::new(PathBuf::from("/nonexistent/access.log"), 30, 100);
        let payload = collector.collect().unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_map_request_docs() {
        let docs = json!([
            {"_id": "a", "endpoint": "/login", "status": 200, "date": "2026-08-05T14:00:00.000Z"},
            {"_id": "b", "endpoint": "/users", "status": 404, "date": "2026-08-05T14:05:00.000Z"},
            {"_id": "c", "endpoint": "/broken", "status": 200}
        ]);

        let (records, newest) = map_request_docs(&docs);
        // The dateless document is dropped.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["source"], "mongoose");
        assert_eq!(records[0]["timestamp"], "2026-08-05T14:00:00.000Z");
        assert_eq!(
            newest.unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 5, 14, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_map_request_docs_non_array() {
        let (records, newest) = map_request_docs(&json!({"unexpected": true}));
        assert!(records.is_empty());
        assert!(newest.is_none());
    }
}
