//! Script run report and export functionality

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete report for one script run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Report metadata
    pub metadata: ReportMetadata,
    /// Summary statistics
    pub summary: RunSummary,
    /// How the run ended
    pub outcome: RunOutcome,
    /// Lines that were logged and skipped
    pub skipped: Vec<SkippedLine>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Script path on the card
    pub script: String,
    /// Run start timestamp
    pub started_at: String,
    /// Run end timestamp
    pub finished_at: String,
    /// Application version
    pub version: String,
}

/// Run statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Layout active when the run ended
    pub locale: String,
    /// Non-blank, non-comment lines seen (repeats excluded)
    pub lines_total: u32,
    pub lines_executed: u32,
    pub lines_skipped: u32,
    /// Lines re-executed by REPEAT
    pub repeat_iterations: u32,
    /// Press and release reports sent
    pub reports_sent: u64,
    /// Wall time according to the run clock
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Aborted { reason: String },
}

/// A line that was not executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLine {
    /// 1-based line number in the script
    pub line: usize,
    pub text: String,
    pub reason: String,
}

impl RunReport {
    pub fn new(
        script: &str,
        started_at: DateTime<Local>,
        summary: RunSummary,
        outcome: RunOutcome,
        skipped: Vec<SkippedLine>,
    ) -> Self {
        Self {
            metadata: ReportMetadata {
                script: script.to_string(),
                started_at: started_at.to_rfc3339(),
                finished_at: Local::now().to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            summary,
            outcome,
            skipped,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Suggested export file name, stamped with the current time
    pub fn default_filename() -> String {
        format!("duckydeck_run_{}.json", Local::now().format("%Y%m%d_%H%M%S"))
    }

    /// Export report to JSON file
    pub fn export_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Export report to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(outcome: RunOutcome) -> RunReport {
        let summary = RunSummary {
            locale: "US".into(),
            lines_total: 3,
            lines_executed: 2,
            lines_skipped: 1,
            repeat_iterations: 0,
            reports_sent: 4,
            duration_ms: 40,
        };
        let skipped = vec![SkippedLine {
            line: 2,
            text: "FOO".into(),
            reason: "unresolved key".into(),
        }];
        RunReport::new("/hello.txt", Local::now(), summary, outcome, skipped)
    }

    #[test]
    fn json_contains_outcome_and_summary() {
        let json = sample(RunOutcome::Completed).to_json().unwrap();
        assert!(json.contains("\"status\": \"completed\""));
        assert!(json.contains("\"reports_sent\": 4"));
        assert!(json.contains("\"script\": \"/hello.txt\""));
    }

    #[test]
    fn aborted_outcome_serializes_reason() {
        let report = sample(RunOutcome::Aborted {
            reason: "layout missing".into(),
        });
        assert!(!report.is_completed());
        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"aborted\""));
        assert!(json.contains("layout missing"));

        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcome, report.outcome);
        assert_eq!(back.skipped, report.skipped);
    }

    #[test]
    fn export_writes_file() {
        let path = std::env::temp_dir().join(format!("duckydeck-report-{}.json", std::process::id()));
        sample(RunOutcome::Completed).export_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("lines_executed"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn default_filename_shape() {
        let name = RunReport::default_filename();
        assert!(name.starts_with("duckydeck_run_"));
        assert!(name.ends_with(".json"));
    }
}
