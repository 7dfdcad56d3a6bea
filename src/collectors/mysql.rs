//! MySQL global status, variables, and query-digest averages
//!
//! The status collector samples `SHOW GLOBAL STATUS` / `SHOW GLOBAL
//! VARIABLES` through the `mysql` client binary and derives the exported
//! field set. A separate digest sampler polls the performance-schema
//! statement summary on its own cadence into a shared rolling window; the
//! status cycle exports the window's per-key means instead of the spiky
//! instantaneous values.

use super::run_capture;
use crate::error::CollectorError;
use crate::exporter::SourceCollector;
use crate::history::RollingWindow;
use crate::records::Payload;
use log::warn;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::process::Command;
use std::sync::{Arc, Mutex};

/// Keys published from the digest window, zeroed when no samples exist
pub const DIGEST_KEYS: &[&str] = &[
    "avg_query_time_ms",
    "select_avg_query_time_ms",
    "create_avg_query_time_ms",
    "update_avg_query_time_ms",
    "delete_avg_query_time_ms",
];

const DIGEST_SQL: &str = "SELECT \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'SELECT%' THEN SUM_TIMER_WAIT END), \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'SELECT%' THEN COUNT_STAR END), \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'INSERT%' THEN SUM_TIMER_WAIT END), \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'INSERT%' THEN COUNT_STAR END), \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'UPDATE%' THEN SUM_TIMER_WAIT END), \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'UPDATE%' THEN COUNT_STAR END), \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'DELETE%' THEN SUM_TIMER_WAIT END), \
    SUM(CASE WHEN DIGEST_TEXT LIKE 'DELETE%' THEN COUNT_STAR END) \
    FROM performance_schema.events_statements_summary_by_digest";

/// Connection parameters for the `mysql` client binary
#[derive(Debug, Clone)]
pub struct MySqlConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl MySqlConnection {
    fn command(&self, sql: &str) -> Command {
        let port = self.port.to_string();
        let mut command = Command::new("mysql");
        command.args([
            "-h",
            self.host.as_str(),
            "-P",
            port.as_str(),
            "-u",
            self.user.as_str(),
        ]);
        if !self.password.is_empty() {
            command.arg(format!("-p{}", self.password));
        }
        command.args(["-N", "-B", "-e", sql]);
        command
    }

    pub fn query(&self, sql: &str) -> Result<String, CollectorError> {
        run_capture(&mut self.command(sql))
    }
}

pub struct MySqlStatusCollector {
    connection: MySqlConnection,
    digest: Arc<Mutex<RollingWindow>>,
}

impl MySqlStatusCollector {
    pub fn new(connection: MySqlConnection, digest: Arc<Mutex<RollingWindow>>) -> Self {
        Self { connection, digest }
    }

    fn fetch_pairs(&self, sql: &str) -> Result<HashMap<String, String>, CollectorError> {
        Ok(parse_pairs(&self.connection.query(sql)?))
    }

    fn digest_averages(&self) -> Map<String, Value> {
        let averages = self.digest.lock().unwrap().averages();
        let mut metrics = Map::new();
        for key in DIGEST_KEYS {
            let value = averages.get(*key).copied().unwrap_or(0.0);
            metrics.insert((*key).to_string(), json!(value));
        }
        metrics
    }
}

/// Parse `mysql -N -B` two-column output into a name/value map
pub fn parse_pairs(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once('\t')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn num(map: &HashMap<String, String>, key: &str) -> f64 {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

/// Derive the exported field set from raw status and variables
pub fn derive_metrics(
    status: &HashMap<String, String>,
    variables: &HashMap<String, String>,
) -> Map<String, Value> {
    let uptime = num(status, "Uptime");
    let table_open_cache = num(variables, "table_open_cache");
    let open_tables = num(status, "Open_tables");

    let mut metrics = Map::new();
    metrics.insert("status".to_string(), json!("up"));
    metrics.insert("uptime_seconds".to_string(), json!(uptime));
    metrics.insert(
        "max_connections".to_string(),
        json!(num(variables, "max_connections")),
    );
    metrics.insert(
        "current_connections".to_string(),
        json!(num(status, "Threads_connected")),
    );
    metrics.insert(
        "threads_running".to_string(),
        json!(num(status, "Threads_running")),
    );
    metrics.insert(
        "queries_per_second".to_string(),
        json!(num(status, "Queries") / uptime.max(1.0)),
    );
    metrics.insert(
        "slow_queries".to_string(),
        json!(num(status, "Slow_queries")),
    );
    metrics.insert("table_open_cache".to_string(), json!(table_open_cache));
    metrics.insert("open_tables".to_string(), json!(open_tables));
    metrics.insert(
        "open_tables_ratio".to_string(),
        json!(if table_open_cache > 0.0 {
            open_tables / table_open_cache
        } else {
            0.0
        }),
    );
    metrics.insert(
        "table_locks_waited".to_string(),
        json!(num(status, "Table_locks_waited")),
    );
    metrics.insert(
        "table_locks_immediate".to_string(),
        json!(num(status, "Table_locks_immediate")),
    );
    metrics.insert(
        "bytes_received".to_string(),
        json!(num(status, "Bytes_received")),
    );
    metrics.insert("bytes_sent".to_string(), json!(num(status, "Bytes_sent")));
    metrics.insert(
        "innodb_buffer_pool_size_bytes".to_string(),
        json!(num(variables, "innodb_buffer_pool_size")),
    );
    metrics.insert(
        "innodb_buffer_pool_reads".to_string(),
        json!(num(status, "Innodb_buffer_pool_reads")),
    );
    metrics.insert(
        "innodb_buffer_pool_read_requests".to_string(),
        json!(num(status, "Innodb_buffer_pool_read_requests")),
    );
    metrics.insert(
        "created_tmp_disk_tables".to_string(),
        json!(num(status, "Created_tmp_disk_tables")),
    );
    metrics.insert(
        "created_tmp_tables".to_string(),
        json!(num(status, "Created_tmp_tables")),
    );
    metrics.insert(
        "created_tmp_files".to_string(),
        json!(num(status, "Created_tmp_files")),
    );
    metrics
}

/// Zeroed field set shipped when the server is unreachable
pub fn placeholder() -> Map<String, Value> {
    let empty = HashMap::new();
    let mut metrics = derive_metrics(&empty, &empty);
    metrics.insert("status".to_string(), json!("down"));
    metrics
}

impl SourceCollector for MySqlStatusCollector {
    fn source(&self) -> String {
        "mysql".to_string()
    }

    fn preflight(&mut self) -> Result<(), CollectorError> {
        run_capture(Command::new("mysql").arg("--version")).map(|_| ())
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let mut metrics = match (
            self.fetch_pairs("SHOW GLOBAL STATUS"),
            self.fetch_pairs("SHOW GLOBAL VARIABLES"),
        ) {
            (Ok(status), Ok(variables)) => derive_metrics(&status, &variables),
            (Err(e), _) | (_, Err(e)) => {
                warn!("mysql: status query failed, exporting down placeholder: {}", e);
                placeholder()
            }
        };
        metrics.extend(self.digest_averages());
        Ok(Payload::Metrics(metrics))
    }
}

/// Samples the statement digest summary into the shared rolling window
///
/// Runs on its own cadence and delivers nothing itself; the status cycle
/// reads the window.
pub struct MySqlDigestSampler {
    connection: MySqlConnection,
    window: Arc<Mutex<RollingWindow>>,
}

impl MySqlDigestSampler {
    pub fn new(connection: MySqlConnection, window: Arc<Mutex<RollingWindow>>) -> Self {
        Self { connection, window }
    }
}

/// Convert one digest summary row into millisecond averages
///
/// Input is the single `mysql -N -B` row: eight tab-separated columns of
/// per-verb total timer waits (picoseconds) and statement counts, with
/// `NULL` for verbs never seen.
pub fn parse_digest_row(row: &str) -> BTreeMap<String, f64> {
    let columns: Vec<f64> = row
        .trim()
        .split('\t')
        .map(|v| v.trim().parse::<f64>().unwrap_or(0.0))
        .collect();
    let col = |i: usize| columns.get(i).copied().unwrap_or(0.0);

    let ps_to_ms = |ps: f64| ps * 1e-9;

    let (select_time, select_count) = (col(0), col(1));
    let (create_time, create_count) = (col(2), col(3));
    let (update_time, update_count) = (col(4), col(5));
    let (delete_time, delete_count) = (col(6), col(7));

    let total_count = select_count + create_count + update_count + delete_count;
    let total_time = select_time + create_time + update_time + delete_time;

    BTreeMap::from([
        (
            "avg_query_time_ms".to_string(),
            if total_count > 0.0 {
                ps_to_ms(total_time) / total_count
            } else {
                0.0
            },
        ),
        (
            "select_avg_query_time_ms".to_string(),
            ps_to_ms(select_time / select_count.max(1.0)),
        ),
        (
            "create_avg_query_time_ms".to_string(),
            ps_to_ms(create_time / create_count.max(1.0)),
        ),
        (
            "update_avg_query_time_ms".to_string(),
            ps_to_ms(update_time / update_count.max(1.0)),
        ),
        (
            "delete_avg_query_time_ms".to_string(),
            ps_to_ms(delete_time / delete_count.max(1.0)),
        ),
    ])
}

impl SourceCollector for MySqlDigestSampler {
    fn source(&self) -> String {
        "mysql_digest".to_string()
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let row = self.connection.query(DIGEST_SQL)?;
        let sample = parse_digest_row(&row);
        self.window.lock().unwrap().record(sample);
        // Sampling only; the status cycle exports the window means.
        Ok(Payload::Metrics(Map::new()))
    }
}
