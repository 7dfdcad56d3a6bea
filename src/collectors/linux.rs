//! Linux host metrics from /proc and df
//!
//! CPU usage comes from two /proc/stat samples a short delta apart;
//! memory, load, uptime, and network counters are single /proc reads;
//! root filesystem usage comes from `df -kP /`. All line parsing is pure
//! and fails closed to zeroed fields.

use super::run_capture;
use crate::error::CollectorError;
use crate::exporter::SourceCollector;
use crate::records::Payload;
use log::warn;
use serde_json::{json, Map, Value};
use std::process::Command;
use std::time::Duration;

/// Delta between the two /proc/stat samples
const CPU_SAMPLE_DELTA: Duration = Duration::from_millis(250);

/// Aggregate jiffy counters from the `cpu` summary line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSample {
    pub idle: u64,
    pub total: u64,
}

/// Parse the aggregate `cpu ` line of /proc/stat
///
/// Idle time includes iowait; total is the sum of all listed fields.
pub fn parse_cpu_line(stat: &str) -> Option<CpuSample> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if fields.len() < 5 {
        return None;
    }

    let idle = fields[3] + fields[4];
    let total = fields.iter().sum();
    Some(CpuSample { idle, total })
}

/// Busy share between two samples, as a percentage
pub fn cpu_usage_percent(before: CpuSample, after: CpuSample) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let idle = after.idle.saturating_sub(before.idle);
    (1.0 - idle as f64 / total as f64) * 100.0
}

/// Used/free/percent from /proc/meminfo (MemTotal and MemAvailable, kB)
pub fn parse_meminfo(meminfo: &str) -> (f64, f64, f64) {
    let field = |name: &str| -> f64 {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    let total_kb = field("MemTotal:");
    let available_kb = field("MemAvailable:");
    let used_kb = (total_kb - available_kb).max(0.0);

    let used_percent = if total_kb > 0.0 {
        used_kb / total_kb * 100.0
    } else {
        0.0
    };
    (used_kb / 1024.0, available_kb / 1024.0, used_percent)
}

/// The three load averages from /proc/loadavg
pub fn parse_loadavg(loadavg: &str) -> (f64, f64, f64) {
    let mut fields = loadavg.split_whitespace();
    let mut next = || fields.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
    (next(), next(), next())
}

/// Seconds of uptime from /proc/uptime
pub fn parse_uptime(uptime: &str) -> f64 {
    uptime
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0)
}

/// Received/transmitted megabytes summed over non-loopback interfaces
pub fn parse_net_dev(net_dev: &str) -> (f64, f64) {
    let mut rx_bytes = 0.0;
    let mut tx_bytes = 0.0;

    for line in net_dev.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<f64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0.0))
            .collect();
        if fields.len() >= 9 {
            rx_bytes += fields[0];
            tx_bytes += fields[8];
        }
    }

    (rx_bytes / 1024.0 / 1024.0, tx_bytes / 1024.0 / 1024.0)
}

/// Total/used gigabytes and used percent from `df -kP` output
pub fn parse_df(df: &str) -> (f64, f64, f64) {
    let Some(line) = df.lines().nth(1) else {
        return (0.0, 0.0, 0.0);
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return (0.0, 0.0, 0.0);
    }

    let total_kb: f64 = fields[1].parse().unwrap_or(0.0);
    let used_kb: f64 = fields[2].parse().unwrap_or(0.0);
    let used_percent = if total_kb > 0.0 {
        used_kb / total_kb * 100.0
    } else {
        0.0
    };
    (
        total_kb / 1024.0 / 1024.0,
        used_kb / 1024.0 / 1024.0,
        used_percent,
    )
}

pub struct LinuxStatsCollector;

impl LinuxStatsCollector {
    pub fn new() -> Self {
        Self
    }

    fn read_proc(name: &str) -> Result<String, CollectorError> {
        Ok(std::fs::read_to_string(format!("/proc/{}", name))?)
    }
}

impl Default for LinuxStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceCollector for LinuxStatsCollector {
    fn source(&self) -> String {
        "linux".to_string()
    }

    fn preflight(&mut self) -> Result<(), CollectorError> {
        Self::read_proc("stat").map(|_| ())
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        let before = parse_cpu_line(&Self::read_proc("stat")?)
            .ok_or_else(|| CollectorError::ParseError("no cpu line in /proc/stat".to_string()))?;
        std::thread::sleep(CPU_SAMPLE_DELTA);
        let after = parse_cpu_line(&Self::read_proc("stat")?)
            .ok_or_else(|| CollectorError::ParseError("no cpu line in /proc/stat".to_string()))?;

        let (memory_used_mb, memory_free_mb, memory_used_percent) =
            parse_meminfo(&Self::read_proc("meminfo")?);
        let (load_1, load_5, load_15) = parse_loadavg(&Self::read_proc("loadavg")?);
        let uptime_seconds = parse_uptime(&Self::read_proc("uptime")?);
        let (net_input_mb, net_output_mb) = parse_net_dev(&Self::read_proc("net/dev")?);

        // Disk usage is best-effort; a failing df zeroes the fields rather
        // than dropping the whole sample.
        let (disk_total_gb, disk_used_gb, disk_used_percent) =
            match run_capture(Command::new("df").args(["-kP", "/"])) {
                Ok(output) => parse_df(&output),
                Err(e) => {
                    warn!("linux: df failed, zeroing disk fields: {}", e);
                    (0.0, 0.0, 0.0)
                }
            };

        let mut metrics = Map::new();
        metrics.insert(
            "cpu_usage_percent".to_string(),
            json!(cpu_usage_percent(before, after)),
        );
        metrics.insert("memory_used_mb".to_string(), json!(memory_used_mb));
        metrics.insert("memory_free_mb".to_string(), json!(memory_free_mb));
        metrics.insert("memory_used_percent".to_string(), json!(memory_used_percent));
        metrics.insert("disk_total_gb".to_string(), json!(disk_total_gb));
        metrics.insert("disk_used_gb".to_string(), json!(disk_used_gb));
        metrics.insert("disk_used_percent".to_string(), json!(disk_used_percent));
        metrics.insert("net_input_mb".to_string(), json!(net_input_mb));
        metrics.insert("net_output_mb".to_string(), json!(net_output_mb));
        metrics.insert("uptime_seconds".to_string(), json!(uptime_seconds));
        metrics.insert("load_avg_1".to_string(), json!(load_1));
        metrics.insert("load_avg_5".to_string(), json!(load_5));
        metrics.insert("load_avg_15".to_string(), json!(load_15));

        Ok(Payload::Metrics(metrics))
    }
}
