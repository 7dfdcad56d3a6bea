//! cron executions and systemd timer listings
//!
//! Cron records are parsed out of syslog with a year-inferred timestamp
//! and windowed by a time cursor; systemd records are a point-in-time
//! snapshot of `systemctl list-timers`. Both batches also append to local
//! daily JSONL spool files alongside the HTTP delivery. All parsing fails
//! closed: a line that does not match yields no record.

use super::run_capture;
use crate::cursor::TimeCursor;
use crate::error::CollectorError;
use crate::exporter::SourceCollector;
use crate::records::Payload;
use chrono::{DateTime, Datelike, Duration, SecondsFormat, TimeZone, Utc};
use log::warn;
use regex::Regex;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

const CRON_PATTERN: &str = r"^(?P<mon>\w{3})\s+(?P<day>\d{1,2})\s+(?P<hour>\d{2}):(?P<min>\d{2}):(?P<sec>\d{2})\s+\S+\s+CRON\[(?P<pid>\d+)\]:\s+\((?P<user>[^)]+)\)\s+CMD\s+\((?P<cmd>.+)\)$";

/// Recent-lines sample size before windowing, as in the syslog source
const CRON_SAMPLE_LINES: usize = 2000;

/// Where to spool daily JSONL batches locally
#[derive(Debug, Clone)]
pub struct SpoolTarget {
    pub base_dir: PathBuf,
    pub app: String,
    pub ip: String,
}

impl SpoolTarget {
    /// Append records to `<base>/<app>/<ip>/logs/<kind>/<YYYY-MM-DD>.jsonl`
    ///
    /// Spooling is best-effort; failures are logged and never fail the
    /// cycle.
    fn append(&self, kind: &str, records: &[Value], now: DateTime<Utc>) {
        if records.is_empty() {
            return;
        }
        let dir = self
            .base_dir
            .join(&self.app)
            .join(&self.ip)
            .join("logs")
            .join(kind);
        let path = dir.join(format!("{}.jsonl", now.format("%Y-%m-%d")));

        let result = std::fs::create_dir_all(&dir).and_then(|_| {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            for record in records {
                writeln!(file, "{}", record)?;
            }
            Ok(())
        });

        if let Err(e) = result {
            warn!("{}: spool append to {} failed: {}", kind, path.display(), e);
        }
    }
}

/// Parse one syslog CRON line into a record
///
/// Syslog timestamps carry no year; `now`'s year is assumed, rolling back
/// one year when that would place the record in the future (a December
/// line read in January).
pub fn parse_cron_line(pattern: &Regex, line: &str, now: DateTime<Utc>) -> Option<Value> {
    let captures = pattern.captures(line)?;

    let month = month_number(&captures["mon"])?;
    let day: u32 = captures["day"].parse().ok()?;
    let hour: u32 = captures["hour"].parse().ok()?;
    let minute: u32 = captures["min"].parse().ok()?;
    let second: u32 = captures["sec"].parse().ok()?;

    let mut timestamp = Utc
        .with_ymd_and_hms(now.year(), month, day, hour, minute, second)
        .single()?;
    if timestamp > now + Duration::days(1) {
        timestamp = Utc
            .with_ymd_and_hms(now.year() - 1, month, day, hour, minute, second)
            .single()?;
    }

    Some(json!({
        "source": "cron",
        "job_id": captures["pid"].to_string(),
        "user": captures["user"].to_string(),
        "command": captures["cmd"].to_string(),
        "status": "executed",
        "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

fn month_number(abbr: &str) -> Option<u32> {
    match abbr {
        "Jan" => Some(1),
        "Feb" => Some(2),
        "Mar" => Some(3),
        "Apr" => Some(4),
        "May" => Some(5),
        "Jun" => Some(6),
        "Jul" => Some(7),
        "Aug" => Some(8),
        "Sep" => Some(9),
        "Oct" => Some(10),
        "Nov" => Some(11),
        "Dec" => Some(12),
        _ => None,
    }
}

fn record_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Windowed reader of CRON executions from syslog
pub struct CronLogCollector {
    syslog_path: PathBuf,
    pattern: Regex,
    cursor: TimeCursor,
    max_logs: usize,
    spool: Option<SpoolTarget>,
}

impl CronLogCollector {
    pub fn new(
        syslog_path: Option<PathBuf>,
        window_minutes: i64,
        max_logs: usize,
        spool: Option<SpoolTarget>,
    ) -> Self {
        Self {
            syslog_path: syslog_path.unwrap_or_else(default_syslog_path),
            pattern: Regex::new(CRON_PATTERN).expect("cron pattern is valid"),
            cursor: TimeCursor::starting_back(window_minutes),
            max_logs,
            spool,
        }
    }

    #[cfg(test)]
    fn with_cursor(mut self, cursor: TimeCursor) -> Self {
        self.cursor = cursor;
        self
    }
}

/// Prefer /var/log/syslog (Debian family), fall back to /var/log/cron
fn default_syslog_path() -> PathBuf {
    let syslog = PathBuf::from("/var/log/syslog");
    if syslog.exists() {
        syslog
    } else {
        PathBuf::from("/var/log/cron")
    }
}

impl SourceCollector for CronLogCollector {
    fn source(&self) -> String {
        "cron".to_string()
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let content = match std::fs::read_to_string(&self.syslog_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("cron: syslog {} absent", self.syslog_path.display());
                return Ok(Payload::Records {
                    key: "scheduler_logs".to_string(),
                    records: Vec::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let cron_lines: Vec<&str> = content.lines().filter(|l| l.contains("CRON")).collect();
        let sampled = &cron_lines[cron_lines.len().saturating_sub(CRON_SAMPLE_LINES)..];

        let mut records: Vec<Value> = sampled
            .iter()
            .filter_map(|line| parse_cron_line(&self.pattern, line, now))
            .filter(|record| {
                record_timestamp(record).is_some_and(|ts| self.cursor.includes(ts))
            })
            .collect();

        if records.len() > self.max_logs {
            let dropped = records.len() - self.max_logs;
            records.drain(..dropped);
        }

        if let Some(last) = records.iter().filter_map(record_timestamp).max() {
            self.cursor.advance_past(last);
        }

        if let Some(spool) = &self.spool {
            spool.append("cron", &records, now);
        }

        Ok(Payload::Records {
            key: "scheduler_logs".to_string(),
            records,
        })
    }
}

/// Parse one `systemctl list-timers --no-legend` line into a record
///
/// The last two columns are UNIT and ACTIVATES. The remainder is NEXT,
/// LEFT, LAST, PASSED: timestamps are the fixed four-token
/// `Dow YYYY-MM-DD HH:MM:SS TZ` shape, durations run up to the literal
/// `left`/`ago` marker, and any column may be a single `n/a`.
pub fn parse_timer_line(line: &str, now: DateTime<Utc>) -> Option<Value> {
    let mut parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }
    let activates = parts.pop()?;
    let unit = parts.pop()?;

    let mut columns = parts.as_slice();
    let next_run = take_timestamp(&mut columns);
    let left = take_duration(&mut columns, "left");
    let last_run = take_timestamp(&mut columns);
    let passed = take_duration(&mut columns, "ago");

    Some(json!({
        "source": "systemd",
        "job_id": unit,
        "command": activates,
        "status": "scheduled",
        "next_run": next_run,
        "last_run": last_run,
        "left": left,
        "passed": passed,
        "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

/// Consume one timer timestamp column: `n/a` or four tokens
fn take_timestamp(columns: &mut &[&str]) -> String {
    match columns.first() {
        None => "n/a".to_string(),
        Some(&"n/a") => {
            *columns = &columns[1..];
            "n/a".to_string()
        }
        Some(_) => {
            let n = columns.len().min(4);
            let value = columns[..n].join(" ");
            *columns = &columns[n..];
            value
        }
    }
}

/// Consume one duration column: `n/a` or tokens through `left`/`ago`
fn take_duration(columns: &mut &[&str], marker: &str) -> String {
    match columns.first() {
        None => "n/a".to_string(),
        Some(&"n/a") => {
            *columns = &columns[1..];
            "n/a".to_string()
        }
        Some(_) => {
            let end = columns
                .iter()
                .position(|&t| t == marker)
                .map(|i| i + 1)
                .unwrap_or(columns.len());
            let value = columns[..end].join(" ");
            *columns = &columns[end..];
            value
        }
    }
}

/// Snapshot of configured systemd timers
pub struct SystemdTimerCollector {
    spool: Option<SpoolTarget>,
}

impl SystemdTimerCollector {
    pub fn new(spool: Option<SpoolTarget>) -> Self {
        Self { spool }
    }
}

impl SourceCollector for SystemdTimerCollector {
    fn source(&self) -> String {
        "systemd".to_string()
    }

    fn preflight(&mut self) -> Result<(), CollectorError> {
        run_capture(Command::new("systemctl").arg("--version")).map(|_| ())
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let output = run_capture(Command::new("systemctl").args([
            "list-timers",
            "--all",
            "--no-pager",
            "--no-legend",
        ]))?;

        let now = Utc::now();
        let records: Vec<Value> = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| parse_timer_line(line, now))
            .collect();

        if let Some(spool) = &self.spool {
            spool.append("systemd", &records, now);
        }

        Ok(Payload::Records {
            key: "scheduler_logs".to_string(),
            records,
        })
    }
}
