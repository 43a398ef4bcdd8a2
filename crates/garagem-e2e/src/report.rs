//! Scenario results and suite reports (text, JSON, JUnit XML).

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::duration_ms;
use crate::outcome::{AttemptOutcome, FailureCategory, FailureKind};
use crate::result::HarnessResult;
use crate::scenario::StepKind;

/// Record of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Position in the scenario (0-based)
    pub index: usize,
    /// Step label, if any
    pub label: Option<String>,
    /// Human-readable action with its selector
    pub action: String,
    /// Step family
    pub kind: StepKind,
    /// Terminal outcome
    pub outcome: AttemptOutcome,
    /// Times the step was attempted
    pub attempts: u32,
    /// A failure here did not fail the scenario
    pub optional: bool,
    /// Wall time, retries included
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl StepRecord {
    /// Step succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Optional step whose failure was tolerated
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        self.optional && !self.outcome.is_success()
    }
}

/// Overall scenario status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    /// Every step completed
    Passed,
    /// Stopped at the first fatal step (or never started)
    Failed,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("PASSED"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Why a scenario failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioFailure {
    /// Fatal step (0-based); `None` when no step ran
    pub step: Option<usize>,
    /// Action of the fatal step
    pub action: Option<String>,
    /// Classified kind; `None` for harness errors
    pub kind: Option<FailureKind>,
    /// Broad category
    pub category: FailureCategory,
    /// Detail message
    pub message: String,
}

impl ScenarioFailure {
    /// Failure of a step
    #[must_use]
    pub fn at_step(
        step: usize,
        action: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step: Some(step),
            action: Some(action.into()),
            kind: Some(kind),
            category: kind.category(),
            message: message.into(),
        }
    }

    /// A precondition was missing; no step ran
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self {
            step: None,
            action: None,
            kind: Some(FailureKind::PreconditionMissing),
            category: FailureCategory::Environment,
            message: message.into(),
        }
    }

    /// The harness itself failed (session acquisition, panic)
    #[must_use]
    pub fn harness(step: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            step,
            action: None,
            kind: None,
            category: FailureCategory::Harness,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScenarioFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.category)?;
        match (self.step, &self.action) {
            (Some(step), Some(action)) => write!(f, "step {} ({action}) ", step + 1)?,
            (Some(step), None) => write!(f, "step {} ", step + 1)?,
            (None, _) => f.write_str("before step 1 ")?,
        }
        match self.kind {
            Some(kind) => write!(f, "{kind}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Aggregate result of one scenario run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario name
    pub name: String,
    /// Passed or failed
    pub status: ScenarioStatus,
    /// Executed steps, in order
    pub steps: Vec<StepRecord>,
    /// First fatal failure
    pub failure: Option<ScenarioFailure>,
    /// Wall time including session setup and teardown
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl ScenarioResult {
    /// Scenario that ran every step
    #[must_use]
    pub fn passed(name: impl Into<String>, steps: Vec<StepRecord>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            status: ScenarioStatus::Passed,
            steps,
            failure: None,
            duration,
        }
    }

    /// Scenario that stopped on a failure
    #[must_use]
    pub fn failed(
        name: impl Into<String>,
        steps: Vec<StepRecord>,
        failure: ScenarioFailure,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            status: ScenarioStatus::Failed,
            steps,
            failure: Some(failure),
            duration,
        }
    }

    /// Check if the scenario passed
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    /// Retries across all steps
    #[must_use]
    pub fn total_retries(&self) -> u32 {
        self.steps.iter().map(|s| s.attempts.saturating_sub(1)).sum()
    }

    /// Classified kind of the fatal failure
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().and_then(|f| f.kind)
    }

    /// Diagnostic text for the report line
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match &self.failure {
            Some(failure) => failure.to_string(),
            None => {
                let skipped = self.steps.iter().filter(|s| s.is_skipped()).count();
                let mut text = format!(
                    "{} steps, {} retries, {:.1}s",
                    self.steps.len(),
                    self.total_retries(),
                    self.duration.as_secs_f64()
                );
                if skipped > 0 {
                    text.push_str(&format!(", {skipped} optional skipped"));
                }
                text
            }
        }
    }

    /// `<name>  PASSED|FAILED  <diagnostic>`
    #[must_use]
    pub fn report_line(&self) -> String {
        format!("{}  {}  {}", self.name, self.status, self.diagnostic())
    }
}

/// Output format for a suite report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// One line per scenario plus a summary
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
    /// JUnit XML for CI
    Junit,
}

/// Results of a suite run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Suite name
    pub suite: String,
    /// Results in scenario order
    pub results: Vec<ScenarioResult>,
    /// Wall time of the whole run
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

impl SuiteReport {
    /// Create a report
    #[must_use]
    pub fn new(suite: impl Into<String>, results: Vec<ScenarioResult>, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            suite: suite.into(),
            results,
            duration,
            started_at: TimeDelta::from_std(duration).map_or(now, |elapsed| now - elapsed),
        }
    }

    /// Get number of passed scenarios
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_passed()).count()
    }

    /// Get number of failed scenarios
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }

    /// Get total scenario count
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.results.len()
    }

    /// Get pass rate (0.0 to 1.0)
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 1.0;
        }
        self.passed_count() as f64 / self.results.len() as f64
    }

    /// Check if all scenarios passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    /// Get failing scenarios
    #[must_use]
    pub fn failures(&self) -> Vec<&ScenarioResult> {
        self.results.iter().filter(|r| !r.is_passed()).collect()
    }

    /// Generate summary string
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} passed ({:.1}%) in {:.1}s",
            self.suite,
            self.passed_count(),
            self.total_count(),
            self.pass_rate() * 100.0,
            self.duration.as_secs_f64()
        )
    }

    /// One report line per scenario, then the summary
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut text = String::new();
        for result in &self.results {
            text.push_str(&result.report_line());
            text.push('\n');
        }
        text.push_str(&self.summary());
        text.push('\n');
        text
    }

    /// Render JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn render_json(&self) -> HarnessResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render JUnit XML content
    #[must_use]
    pub fn render_junit(&self) -> String {
        let mut xml = String::new();

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(
            r#"<testsuite name="{}" tests="{}" failures="{}" time="{:.3}" timestamp="{}">"#,
            escape_xml(&self.suite),
            self.total_count(),
            self.failed_count(),
            self.duration.as_secs_f64(),
            self.started_at.format("%Y-%m-%dT%H:%M:%S")
        ));
        xml.push('\n');

        for result in &self.results {
            xml.push_str(&format!(
                r#"  <testcase classname="{}" name="{}" time="{:.3}">"#,
                escape_xml(&self.suite),
                escape_xml(&result.name),
                result.duration.as_secs_f64()
            ));
            xml.push('\n');

            if let Some(failure) = &result.failure {
                let kind = failure
                    .kind
                    .map_or_else(|| "HarnessError".to_string(), |k| k.to_string());
                xml.push_str(&format!(
                    r#"    <failure type="{}" message="{}">{}</failure>"#,
                    escape_xml(&kind),
                    escape_xml(&failure.message),
                    escape_xml(&failure.to_string())
                ));
                xml.push('\n');
            }

            xml.push_str("  </testcase>\n");
        }

        xml.push_str("</testsuite>\n");
        xml
    }

    /// Render in the given format
    ///
    /// # Errors
    ///
    /// Returns error if JSON serialization fails
    pub fn render(&self, format: ReportFormat) -> HarnessResult<String> {
        match format {
            ReportFormat::Text => Ok(self.render_text()),
            ReportFormat::Json => self.render_json(),
            ReportFormat::Junit => Ok(self.render_junit()),
        }
    }

    /// Write the report to a file
    ///
    /// # Errors
    ///
    /// Returns error if rendering or file writing fails
    pub fn write(&self, path: &Path, format: ReportFormat) -> HarnessResult<()> {
        let content = self.render(format)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
