//! Outcomes of uploads and remote commands.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;

const MIB: f64 = 1024.0 * 1024.0;

/// Summary of one completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// The file that was read.
    pub local_path: Utf8PathBuf,
    /// Where it was written.
    pub remote_path: String,
    /// Number of content bytes sent.
    pub bytes: u64,
    /// Wall time from opening the sink to its final acknowledgement.
    pub elapsed: Duration,
}

impl TransferReport {
    /// Average throughput in bytes per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.bytes as f64 / secs } else { 0.0 }
    }

    /// Average throughput in MiB per second.
    #[must_use]
    pub fn mib_per_second(&self) -> f64 {
        self.bytes_per_second() / MIB
    }
}

/// Collected result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit status, if the server reported one.
    pub exit_status: Option<u32>,
    /// Terminating signal, if the command was killed.
    pub exit_signal: Option<String>,
}

impl CommandOutput {
    /// `true` if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == Some(0) && self.exit_signal.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        let report = TransferReport {
            local_path: Utf8PathBuf::from("/w/proj/a.py"),
            remote_path: "/home/robot/a.py".to_owned(),
            bytes: 2 * 1024 * 1024,
            elapsed: Duration::from_millis(500),
        };
        assert!((report.mib_per_second() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_elapsed_has_no_throughput() {
        let report = TransferReport {
            local_path: Utf8PathBuf::from("a.py"),
            remote_path: "a.py".to_owned(),
            bytes: 10,
            elapsed: Duration::ZERO,
        };
        assert!(report.bytes_per_second().abs() < f64::EPSILON);
    }

    #[test]
    fn test_command_success() {
        let mut output = CommandOutput {
            exit_status: Some(0),
            ..CommandOutput::default()
        };
        assert!(output.success());
        output.exit_status = Some(2);
        assert!(!output.success());
        assert!(!CommandOutput::default().success());
    }

    #[test]
    fn test_report_serializes() {
        let report = TransferReport {
            local_path: Utf8PathBuf::from("/w/proj/a.py"),
            remote_path: "/home/robot/a.py".to_owned(),
            bytes: 12,
            elapsed: Duration::from_secs(1),
        };
        insta::assert_json_snapshot!(report, @r#"
        {
          "local_path": "/w/proj/a.py",
          "remote_path": "/home/robot/a.py",
          "bytes": 12,
          "elapsed": {
            "secs": 1,
            "nanos": 0
          }
        }
        "#);
    }
}
