//! Byte-offset tailing of growing log files
//!
//! A tailer reads only the bytes appended since its last poll, detects
//! rotation/truncation by a shrinking file size, and never buffers more
//! than one incremental window. The offset advances only past complete
//! lines actually returned; a dangling partial line is left in place and
//! read whole on the next poll, so nothing is emitted twice and nothing is
//! lost.

use crate::error::CollectorError;
use crate::exporter::SourceCollector;
use crate::records::{LogRecord, Payload, Severity};
use chrono::Utc;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// Case-insensitive keyword filter with severity classification
///
/// A line is kept when any keyword matches; the first matching keyword
/// determines the severity.
#[derive(Debug, Clone)]
pub struct LineFilter {
    patterns: Vec<(String, Severity)>,
}

impl LineFilter {
    pub fn new(patterns: &[(&str, Severity)]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|(keyword, severity)| (keyword.to_lowercase(), *severity))
                .collect(),
        }
    }

    /// Standard filter for service error logs: error-class beats warn-class
    pub fn errors_and_warnings() -> Self {
        Self::new(&[("err", Severity::Error), ("warn", Severity::Warn)])
    }

    /// Severity of the first matching keyword, or `None` to drop the line
    pub fn classify(&self, line: &str) -> Option<Severity> {
        let lowered = line.to_lowercase();
        self.patterns
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword))
            .map(|(_, severity)| *severity)
    }
}

/// Incremental reader of a monotonically growing text log file
#[derive(Debug)]
pub struct LogTailer {
    source: String,
    path: PathBuf,
    filter: LineFilter,
    max_per_batch: usize,
    offset: u64,
}

impl LogTailer {
    /// Create a tailer starting at offset 0
    ///
    /// # Arguments
    ///
    /// * `source` - Tag stamped on every emitted record (e.g. "redis")
    /// * `path` - The log file to follow
    /// * `filter` - Keyword predicate deciding which lines are kept
    /// * `max_per_batch` - Cap on records returned per poll
    ///
    /// # Example
    ///
    /// ```
    /// use outpost::tail::{LineFilter, LogTailer};
    /// use std::path::PathBuf;
    ///
    /// let tailer = LogTailer::new(
    ///     "redis",
    ///     PathBuf::from("/var/log/redis/redis-server.log"),
    ///     LineFilter::errors_and_warnings(),
    ///     100,
    /// );
    /// ```
    pub fn new(source: &str, path: PathBuf, filter: LineFilter, max_per_batch: usize) -> Self {
        Self {
            source: source.to_string(),
            path,
            filter,
            max_per_batch,
            offset: 0,
        }
    }

    /// Byte offset of the next unread position
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read newly appended lines, filter them, and cap the batch
    ///
    /// A missing file yields no records and leaves the offset untouched: a
    /// gone-then-back file is not rotation, and resetting here would
    /// re-read old content if it reappears. A shrunken file is rotation,
    /// and the next read restarts from offset 0.
    pub fn poll(&mut self) -> Result<Vec<LogRecord>, CollectorError> {
        let size = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{}: log file {} absent, skipping poll", self.source, self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if size < self.offset {
            info!(
                "{}: log file {} shrank from {} to {} bytes, assuming rotation",
                self.source,
                self.path.display(),
                self.offset,
                size
            );
            self.offset = 0;
        }

        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;

        let mut chunk = Vec::with_capacity((size - self.offset) as usize);
        file.take(size - self.offset).read_to_end(&mut chunk)?;

        // Only complete lines count; a trailing fragment stays unread until
        // the writer finishes it.
        let complete_len = match chunk.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => last_newline + 1,
            None => {
                debug!(
                    "{}: only a partial line appended to {}, waiting for the rest",
                    self.source,
                    self.path.display()
                );
                return Ok(Vec::new());
            }
        };

        let text = String::from_utf8_lossy(&chunk[..complete_len]);
        let now = Utc::now();

        let mut records: Vec<LogRecord> = text
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                self.filter.classify(line).map(|level| LogRecord {
                    source: self.source.clone(),
                    level,
                    message: line.to_string(),
                    timestamp: now,
                })
            })
            .collect();

        self.offset += complete_len as u64;

        if records.len() > self.max_per_batch {
            let dropped = records.len() - self.max_per_batch;
            warn!(
                "{}: dropping {} oldest of {} filtered lines (cap {})",
                self.source,
                dropped,
                records.len(),
                self.max_per_batch
            );
            records.drain(..dropped);
        }

        Ok(records)
    }
}

impl SourceCollector for LogTailer {
    fn source(&self) -> String {
        self.source.clone()
    }

    fn collect(&mut self) -> Result<Payload, CollectorError> {
        Ok(Payload::Logs(self.poll()?))
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use tempfile::tempdir;

    #[quickcheck]
    fn prop_batch_never_exceeds_cap(line_count: u8, cap: u8) -> bool {
        let cap = usize::from(cap % 50) + 1;
        let dir = tempdir().unwrap();
        let path = dir.path().join("prop.log");

        let lines: String = (0..line_count)
            .map(|i| format!("ERR generated {}\n", i))
            .collect();
        std::fs::write(&path, lines).unwrap();

        let mut tailer = LogTailer::new(
            "prop",
            path,
            LineFilter::errors_and_warnings(),
            cap,
        );
        let batch = tailer.poll().unwrap();

        batch.len() <= cap
    }

    #[quickcheck]
    fn prop_offset_never_exceeds_file_size(chunks: Vec<String>) -> bool {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grow.log");
        std::fs::write(&path, "").unwrap();

        let mut tailer = LogTailer::new(
            "prop",
            path.clone(),
            LineFilter::errors_and_warnings(),
            100,
        );

        for chunk in chunks.iter().take(10) {
            let mut content = std::fs::read(&path).unwrap();
            content.extend_from_slice(chunk.as_bytes());
            content.push(b'\n');
            std::fs::write(&path, &content).unwrap();

            if tailer.poll().is_err() {
                return false;
            }
            let size = std::fs::metadata(&path).unwrap().len();
            if tailer.offset() > size {
                return false;
            }
        }
        true
    }

    #[quickcheck]
    fn prop_unmatched_lines_never_emitted(lines: Vec<String>) -> bool {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filter.log");

        let content: String = lines
            .iter()
            .take(20)
            .map(|l| format!("{}\n", l.replace('\n', " ")))
            .collect();
        std::fs::write(&path, content).unwrap();

        let filter = LineFilter::errors_and_warnings();
        let mut tailer = LogTailer::new("prop", path, filter.clone(), 1000);

        match tailer.poll() {
            Ok(batch) => batch
                .iter()
                .all(|record| filter.classify(&record.message).is_some()),
            Err(_) => false,
        }
    }
}
