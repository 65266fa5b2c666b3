//! Crash report extraction from server logs.
//!
//! A crashing server writes a bug report to its log, followed by a full
//! INFO dump. The interesting part is the window between the two
//! markers; that's what gets surfaced to the operator.

use std::path::{Path, PathBuf};

const REPORT_START: &str = "BUG REPORT START";
const INFO_START: &str = "------ INFO OUTPUT ------";

#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("crash diagnostics unavailable, could not read {}: {source}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The bug report section of a server log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub log_path: PathBuf,
    /// Report lines, starting with the marker line. Empty if the log
    /// holds no report.
    pub lines: Vec<String>,
}

impl CrashReport {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Reads `path` and pulls out the crash report, if there is one.
pub fn extract_crash_report(path: &Path) -> Result<CrashReport, DiagnosticsError> {
    let raw = std::fs::read(path).map_err(|source| DiagnosticsError::Unavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&raw);

    Ok(CrashReport {
        log_path: path.to_path_buf(),
        lines: report_window(&text),
    })
}

fn report_window(text: &str) -> Vec<String> {
    text.lines()
        .skip_while(|line| !line.contains(REPORT_START))
        .take_while(|line| !line.contains(INFO_START))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
1:M 01 Jan 2024 00:00:00.000 * Ready to accept connections tcp
1:M 01 Jan 2024 00:00:01.000 # === REDIS BUG REPORT START: Cut & paste starting from here ===
1:M 01 Jan 2024 00:00:01.000 # Crashed running the instruction at: 0x0
------ STACK TRACE ------
frame 0
------ INFO OUTPUT ------
# Server
redis_version:7.2.4
";

    #[test]
    fn window_between_markers() {
        let lines = report_window(LOG);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains(REPORT_START));
        assert_eq!(lines[3], "frame 0");
    }

    #[test]
    fn clean_log_has_no_report() {
        assert!(report_window("just\nsome\nlines\n").is_empty());
    }

    #[test]
    fn missing_log_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_crash_report(&dir.path().join("nope.log")).unwrap_err();
        assert!(matches!(err, DiagnosticsError::Unavailable { .. }));
    }

    #[test]
    fn reads_non_utf8_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let mut raw = b"noise \xff\n".to_vec();
        raw.extend_from_slice(LOG.as_bytes());
        std::fs::write(&path, raw).unwrap();

        let report = extract_crash_report(&path).unwrap();
        assert_eq!(report.lines.len(), 4);
        assert_eq!(report.log_path, path);
    }
}
