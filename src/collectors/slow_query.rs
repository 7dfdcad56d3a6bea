//! MongoDB and MySQL slow-query sources
//!
//! Both sub-sources are cursor-windowed: each cycle fetches only entries
//! newer than the cursor, oldest first, capped, then advances the cursor
//! strictly past the newest entry shipped. The two sources are
//! independent reads against different backends; both contribute to the
//! same envelope under their own keys.

use super::run_capture;
use crate::cursor::TimeCursor;
use crate::error::CollectorError;
use crate::exporter::SourceCollector;
use crate::records::Payload;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::process::Command;

use super::mysql::MySqlConnection;

/// Slow operations from the MongoDB profiler collection
pub struct MongoSlowQueryCollector {
    uri: String,
    db: String,
    threshold_ms: i64,
    max_queries: usize,
    cursor: TimeCursor,
}

impl MongoSlowQueryCollector {
    pub fn new(
        uri: &str,
        db: &str,
        threshold_ms: i64,
        max_queries: usize,
        window_minutes: i64,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            db: db.to_string(),
            threshold_ms,
            max_queries,
            cursor: TimeCursor::starting_back(window_minutes),
        }
    }

    fn fetch(&self) -> Result<Value, CollectorError> {
        let cutoff = self.cursor.cutoff().to_rfc3339_opts(SecondsFormat::Millis, true);
        let script = format!(
            "JSON.stringify(db.getSiblingDB('{db}').system.profile\
             .find({{millis: {{$gte: {threshold}}}, ts: {{$gt: new Date('{cutoff}')}}}})\
             .sort({{ts: 1}}).limit({limit}).toArray())",
            db = self.db,
            threshold = self.threshold_ms,
            cutoff = cutoff,
            limit = self.max_queries,
        );
        let output = run_capture(Command::new("mongosh").args([
            self.uri.as_str(),
            "--quiet",
            "--eval",
            script.as_str(),
        ]))?;
        serde_json::from_str(output.trim())
            .map_err(|e| CollectorError::ParseError(format!("system.profile query: {}", e)))
    }
}

/// Trim profiler documents to the exported fields and find the newest `ts`
pub fn map_profile_docs(docs: &Value) -> (Vec<Value>, Option<DateTime<Utc>>) {
    let Some(array) = docs.as_array() else {
        return (Vec::new(), None);
    };

    let mut records = Vec::new();
    let mut newest: Option<DateTime<Utc>> = None;

    for doc in array {
        let Some(ts) = doc
            .get("ts")
            .and_then(Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
        else {
            continue;
        };

        records.push(json!({
            "op": doc.get("op").cloned().unwrap_or(Value::Null),
            "ns": doc.get("ns").cloned().unwrap_or(Value::Null),
            "millis": doc.get("millis").cloned().unwrap_or(Value::Null),
            "query": doc.get("query").cloned().unwrap_or(Value::Null),
            "ts": ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        }));

        newest = Some(match newest {
            Some(current) if current >= ts => current,
            _ => ts,
        });
    }

    (records, newest)
}

impl SourceCollector for MongoSlowQueryCollector {
    fn source(&self) -> String {
        "mongo_slow".to_string()
    }

    fn preflight(&mut self) -> Result<(), CollectorError> {
        run_capture(Command::new("mongosh").arg("--version")).map(|_| ())
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let docs = self.fetch()?;
        let (records, newest) = map_profile_docs(&docs);

        if let Some(last) = newest {
            self.cursor.advance_past(last);
        }

        Ok(Payload::Records {
            key: "mongo_slow_queries".to_string(),
            records,
        })
    }
}

/// Slow statements from the `mysql.slow_log` table
pub struct MySqlSlowQueryCollector {
    connection: MySqlConnection,
    max_queries: usize,
    cursor: TimeCursor,
}

impl MySqlSlowQueryCollector {
    pub fn new(connection: MySqlConnection, max_queries: usize, window_minutes: i64) -> Self {
        Self {
            connection,
            max_queries,
            cursor: TimeCursor::starting_back(window_minutes),
        }
    }

    fn query_sql(&self) -> String {
        format!(
            "SELECT start_time, user_host, query_time, sql_text FROM mysql.slow_log \
             WHERE start_time > '{}' ORDER BY start_time ASC LIMIT {}",
            self.cursor.cutoff().format("%Y-%m-%d %H:%M:%S%.6f"),
            self.max_queries,
        )
    }
}

/// Parse `mysql -N -B` slow-log rows and find the newest `start_time`
///
/// Rows are tab-separated with the free-text statement last, so only the
/// first three tabs split fields. Rows with fewer columns or unparseable
/// timestamps are dropped.
pub fn parse_slow_log_rows(output: &str) -> (Vec<Value>, Option<DateTime<Utc>>) {
    let mut records = Vec::new();
    let mut newest: Option<DateTime<Utc>> = None;

    for line in output.lines() {
        let columns: Vec<&str> = line.splitn(4, '\t').collect();
        let &[start_time, user_host, query_time, sql_text] = columns.as_slice() else {
            continue;
        };

        let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(start_time, "%Y-%m-%d %H:%M:%S%.f")
        else {
            continue;
        };
        let timestamp = parsed.and_utc();

        records.push(json!({
            "start_time": start_time,
            "user_host": user_host,
            "query_time": query_time,
            "sql_text": sql_text,
        }));

        newest = Some(match newest {
            Some(current) if current >= timestamp => current,
            _ => timestamp,
        });
    }

    (records, newest)
}

impl SourceCollector for MySqlSlowQueryCollector {
    fn source(&self) -> String {
        "mysql_slow".to_string()
    }

    fn preflight(&mut self) -> Result<(), CollectorError> {
        run_capture(Command::new("mysql").arg("--version")).map(|_| ())
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let output = self.connection.query(&self.query_sql())?;
        let (records, newest) = parse_slow_log_rows(&output);

        if let Some(last) = newest {
            self.cursor.advance_past(last);
        }

        Ok(Payload::Records {
            key: "mysql_slow_queries".to_string(),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_map_profile_docs() {
        let docs = json!([
            {"op": "query", "ns": "livolive.users", "millis": 250,
             "query": {"find": "users"}, "ts": "2026-08-05T14:00:00.000Z"},
            {"op": "update", "ns": "livolive.orders", "millis": 900,
             "query": {}, "ts": "2026-08-05T14:10:00.000Z"},
            {"op": "query", "ns": "livolive.broken", "millis": 100}
        ]);

        let (records, newest) = map_profile_docs(&docs);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["op"], "query");
        assert_eq!(records[0]["millis"], 250);
        assert_eq!(records[1]["ns"], "livolive.orders");
        assert_eq!(
            newest.unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 5, 14, 10, 0).unwrap()
        );
    }

    #[test]
    fn test_map_profile_docs_non_array() {
        let (records, newest) = map_profile_docs(&json!("unexpected"));
        assert!(records.is_empty());
        assert!(newest.is_none());
    }

    #[test]
    fn test_parse_slow_log_rows() {
        let output = "2026-08-05 14:00:01.123456\tapp[app] @ [10.0.0.9]\t00:00:03\tSELECT * FROM orders WHERE\tid > 5\n\
                      2026-08-05 14:05:02.000000\troot[root] @ localhost []\t00:00:12\tALTER TABLE users ADD COLUMN x INT\n";

        let (records, newest) = parse_slow_log_rows(output);
        assert_eq!(records.len(), 2);
        // Tabs inside sql_text survive the 4-way split.
        assert_eq!(records[0]["sql_text"], "SELECT * FROM orders WHERE\tid > 5");
        assert_eq!(records[1]["query_time"], "00:00:12");
        assert_eq!(
            newest.unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 5, 14, 5, 2).unwrap()
        );
    }

    #[test]
    fn test_parse_slow_log_rows_malformed_dropped() {
        let output = "not-a-row\nbad\ttimestamp\there\tSELECT 1\n";
        let (records, newest) = parse_slow_log_rows(output);
        assert!(records.is_empty());
        assert!(newest.is_none());
    }

    #[test]
    fn test_query_sql_embeds_cursor_and_cap() {
        let mut collector = MySqlSlowQueryCollector::new(
            MySqlConnection {
                host: "127.0.0.1".to_string(),
                port: 3306,
                user: "root".to_string(),
                password: String::new(),
            },
            25,
            30,
        );
        collector.cursor = TimeCursor::at(Utc.with_ymd_and_hms(2026, 8, 5, 14, 0, 0).unwrap());

        let sql = collector.query_sql();
        assert!(sql.contains("start_time > '2026-08-05 14:00:00.000000'"));
        assert!(sql.contains("LIMIT 25"));
        assert!(sql.contains("ORDER BY start_time ASC"));
    }
}
