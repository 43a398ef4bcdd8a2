//! Subcommand handlers

use garagem_e2e::{HarnessConfig, ReportFormat, Suite, SuiteReport};
use std::time::Duration;
use tracing::info;

use crate::commands::{RunArgs, SuiteArgs};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;

fn reporter(config: &CliConfig) -> ProgressReporter {
    ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet())
}

/// Layer harness settings: config file, suite, environment, then flags
///
/// # Errors
///
/// Returns error if the config file is unreadable or the result is invalid
pub fn harness_config(suite: &Suite, args: &RunArgs) -> CliResult<HarnessConfig> {
    let base = match &args.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    let mut config = suite.configure(base).with_env_overrides();

    if let Some(url) = &args.base_url {
        config = config.with_base_url(url.clone());
    }
    if let Some(ms) = args.step_timeout {
        config = config.with_step_timeout(Duration::from_millis(ms));
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if args.headed {
        config.browser = config.browser.with_headless(false);
    }
    if args.no_sandbox {
        config.browser = config.browser.with_no_sandbox();
    }
    if let Some(path) = &args.chromium_path {
        config.browser = config.browser.with_chromium_path(path.clone());
    }

    config.validate()?;
    Ok(config)
}

/// `run`: execute the suite and report. Returns whether every scenario passed.
///
/// # Errors
///
/// Returns error for unreadable or invalid suites, bad settings, or when the
/// binary has no browser support
pub fn run(config: &CliConfig, args: &RunArgs) -> CliResult<bool> {
    let out = reporter(config);
    let suite = Suite::load(&args.suite)?.select(&args.scenarios)?;
    let harness = harness_config(&suite, args)?;
    info!(
        suite = %suite.name,
        base_url = %harness.base_url,
        scenarios = suite.scenarios.len(),
        "starting run"
    );

    let format = ReportFormat::from(args.format);
    let show_text = format == ReportFormat::Text || args.output.is_some();
    if show_text {
        out.header(&format!(
            "{} ({} scenarios) against {}",
            suite.name,
            suite.scenarios.len(),
            harness.base_url
        ));
    }

    let report = execute(&suite, harness)?;

    if show_text {
        out.report(&report);
    }
    match &args.output {
        Some(path) => {
            report
                .write(path, format)
                .map_err(|e| CliError::report_generation(format!("{}: {e}", path.display())))?;
            out.info(&format!("report written to {}", path.display()));
        }
        None if format != ReportFormat::Text => println!("{}", report.render(format)?),
        None => {}
    }

    Ok(report.all_passed())
}

#[cfg(feature = "browser")]
fn execute(suite: &Suite, harness: HarnessConfig) -> CliResult<SuiteReport> {
    use garagem_e2e::{ChromiumSessionFactory, ScenarioRunner};
    use std::sync::Arc;

    let factory = Arc::new(ChromiumSessionFactory::new(harness.browser.clone()));
    let runner = ScenarioRunner::new(factory, harness);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(runner.run_suite(suite)))
}

#[cfg(not(feature = "browser"))]
fn execute(_suite: &Suite, _harness: HarnessConfig) -> CliResult<SuiteReport> {
    Err(CliError::unsupported(
        "this binary was built without the `browser` feature",
    ))
}

/// `validate`: parse the suite and print warnings
///
/// # Errors
///
/// Returns the first structural problem in the suite
pub fn validate(config: &CliConfig, args: &SuiteArgs) -> CliResult<()> {
    let out = reporter(config);
    let suite = Suite::load(&args.suite)?;
    let warnings = suite.validate()?;
    for warning in &warnings {
        out.warning(warning);
    }
    let steps: usize = suite.scenarios.iter().map(|s| s.steps.len()).sum();
    out.info(&format!(
        "{}: {} scenarios, {} steps, {} warnings; suite is valid",
        suite.name,
        suite.scenarios.len(),
        steps,
        warnings.len()
    ));
    Ok(())
}

/// `list`: one line per scenario
///
/// # Errors
///
/// Returns error for unreadable or invalid suites
pub fn list(config: &CliConfig, args: &SuiteArgs) -> CliResult<()> {
    let suite = Suite::load(&args.suite)?;
    for scenario in &suite.scenarios {
        let mut line = format!("{}  ({} steps)", scenario.name, scenario.steps.len());
        if !scenario.requires.is_empty() {
            let requires: Vec<String> = scenario.requires.iter().map(ToString::to_string).collect();
            line.push_str(&format!("  requires {}", requires.join(", ")));
        }
        if config.verbosity.is_verbose() && !scenario.description.is_empty() {
            line.push_str(&format!("  {}", scenario.description));
        }
        println!("{line}");
    }
    Ok(())
}
