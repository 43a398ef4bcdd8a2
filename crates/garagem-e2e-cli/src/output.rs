//! Console output: colored report lines, warnings and the run summary

use console::{style, Style, Term};
use garagem_e2e::{ScenarioResult, ScenarioStatus, SuiteReport, ValidationWarning};

/// Writes human-readable output for a run
#[derive(Debug)]
pub struct ProgressReporter {
    out: Term,
    err: Term,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            out: Term::stdout(),
            err: Term::stderr(),
            use_color,
            quiet,
        }
    }

    /// Format one result as `<name>  PASSED|FAILED  <diagnostic>`
    #[must_use]
    pub fn format_result(&self, result: &ScenarioResult) -> String {
        if !self.use_color {
            return result.report_line();
        }
        let status = match result.status {
            ScenarioStatus::Passed => style(result.status).green().bold(),
            ScenarioStatus::Failed => style(result.status).red().bold(),
        };
        format!("{}  {status}  {}", result.name, result.diagnostic())
    }

    /// Print one result line. Failures print even in quiet mode.
    pub fn result(&self, result: &ScenarioResult) {
        if self.quiet && result.is_passed() {
            return;
        }
        let _ = self.out.write_line(&self.format_result(result));
    }

    /// Print every result line and the summary
    pub fn report(&self, report: &SuiteReport) {
        for result in &report.results {
            self.result(result);
        }
        self.summary(report);
    }

    /// Print the suite summary
    pub fn summary(&self, report: &SuiteReport) {
        if self.quiet && report.all_passed() {
            return;
        }
        let line = report.summary();
        let styled = if !self.use_color {
            line
        } else if report.all_passed() {
            Style::new().green().apply_to(line).to_string()
        } else {
            Style::new().red().apply_to(line).to_string()
        };
        let _ = self.out.write_line("");
        let _ = self.out.write_line(&styled);
    }

    /// Print a validation warning on stderr
    pub fn warning(&self, warning: &ValidationWarning) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("⚠").yellow().bold().to_string()
        } else {
            "WARN".to_string()
        };
        let _ = self.err.write_line(&format!("{prefix} {warning}"));
    }

    /// Print an informational line on stdout
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let _ = self.out.write_line(message);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }
        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };
        let _ = self.out.write_line(&styled);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use garagem_e2e::{FailureKind, ScenarioFailure};
    use std::time::Duration;

    fn failed() -> ScenarioResult {
        ScenarioResult::failed(
            "TC008-rbac-operator",
            Vec::new(),
            ScenarioFailure::at_step(7, "assert_hidden testid=price-display", FailureKind::AssertionFailed, "still visible"),
            Duration::from_millis(1200),
        )
    }

    #[test]
    fn test_plain_line_matches_report_line() {
        let reporter = ProgressReporter::new(false, false);
        let result = failed();
        assert_eq!(reporter.format_result(&result), result.report_line());
    }

    #[test]
    fn test_colored_line_keeps_text() {
        console::set_colors_enabled(true);
        let reporter = ProgressReporter::new(true, false);
        let line = reporter.format_result(&failed());
        let plain = console::strip_ansi_codes(&line);
        assert_eq!(plain, failed().report_line());
    }
}
