/// Redis INFO metrics
pub mod redis;

/// MySQL global status, variables, and query-digest averages
pub mod mysql;

/// MongoDB server status and API log stats
pub mod mongodb;

/// Linux host metrics from /proc and df
pub mod linux;

/// nginx access logs and MongoDB request-log collections
pub mod access_log;

/// cron executions and systemd timer listings
pub mod schedule_log;

/// MongoDB and MySQL slow-query sources
pub mod slow_query;

use crate::error::CollectorError;
use std::process::{Command, Stdio};

/// Run a command to completion and capture its stdout
///
/// Spawn failures and non-zero exits both surface as `CollectorError`, so
/// callers fall back to their placeholder/empty policy.
pub(crate) fn run_capture(command: &mut Command) -> Result<String, CollectorError> {
    let program = command.get_program().to_string_lossy().into_owned();

    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| CollectorError::SubprocessSpawn(format!("{}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CollectorError::SubprocessFailed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_capture_collects_stdout() {
        let out = run_capture(Command::new("echo").arg("hello")).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_capture_spawn_failure() {
        let err = run_capture(&mut Command::new("definitely-not-a-real-binary")).unwrap_err();
        assert!(matches!(err, CollectorError::SubprocessSpawn(_)));
    }

    #[test]
    fn test_run_capture_nonzero_exit() {
        let err = run_capture(Command::new("sh").args(["-c", "exit 3"])).unwrap_err();
        assert!(matches!(err, CollectorError::SubprocessFailed(_)));
    }
}
