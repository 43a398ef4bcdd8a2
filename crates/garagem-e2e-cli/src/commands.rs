//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// garagem-e2e: run the Garagem40 end-to-end scenario suite
#[derive(Parser, Debug)]
#[command(name = "garagem-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only failures and errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios from a suite file
    Run(RunArgs),

    /// Parse and validate a suite file without running it
    Validate(SuiteArgs),

    /// List the scenarios of a suite file
    List(SuiteArgs),
}

/// Arguments shared by commands that only read a suite
#[derive(Args, Debug)]
pub struct SuiteArgs {
    /// Suite file (YAML)
    pub suite: PathBuf,
}

/// Arguments for the run command
#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    /// Suite file (YAML)
    pub suite: PathBuf,

    /// Run only these scenarios (repeatable)
    #[arg(short, long = "scenario", value_name = "NAME")]
    pub scenarios: Vec<String>,

    /// Report format
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormatArg,

    /// Write the report to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Scenarios run at once, each in its own browser
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Harness config file (YAML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Application base URL (overrides config, suite and G40_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Default per-step timeout in milliseconds
    #[arg(long)]
    pub step_timeout: Option<u64>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Disable the Chromium sandbox (containers, CI)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Chromium executable (overrides CHROMIUM_PATH)
    #[arg(long, value_name = "PATH")]
    pub chromium_path: Option<String>,
}

/// Report format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormatArg {
    /// One line per scenario plus a summary
    #[default]
    Text,
    /// JSON document
    Json,
    /// JUnit XML
    Junit,
}

impl From<ReportFormatArg> for garagem_e2e::ReportFormat {
    fn from(arg: ReportFormatArg) -> Self {
        match arg {
            ReportFormatArg::Text => Self::Text,
            ReportFormatArg::Json => Self::Json,
            ReportFormatArg::Junit => Self::Junit,
        }
    }
}

/// Color choice argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorArg {
    /// Detect terminal
    #[default]
    Auto,
    /// Always color
    Always,
    /// Never color
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Log format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod parse_tests {
        use super::*;

        #[test]
        fn test_run_with_flags() {
            let cli = Cli::try_parse_from([
                "garagem-e2e",
                "-vv",
                "run",
                "scenarios/garagem40.yaml",
                "--scenario",
                "TC001",
                "-s",
                "TC008",
                "--format",
                "junit",
                "--output",
                "report.xml",
                "-j",
                "2",
                "--no-sandbox",
            ])
            .unwrap();
            assert_eq!(cli.verbose, 2);
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.scenarios, ["TC001", "TC008"]);
            assert_eq!(args.format, ReportFormatArg::Junit);
            assert_eq!(args.concurrency, Some(2));
            assert!(args.no_sandbox);
            assert!(!args.headed);
        }

        #[test]
        fn test_validate_and_list() {
            let cli = Cli::try_parse_from(["garagem-e2e", "validate", "suite.yaml"]).unwrap();
            assert!(matches!(cli.command, Commands::Validate(_)));
            let cli = Cli::try_parse_from(["garagem-e2e", "list", "suite.yaml", "-q"]).unwrap();
            assert!(cli.quiet);
            assert!(matches!(cli.command, Commands::List(_)));
        }

        #[test]
        fn test_suite_path_required() {
            assert!(Cli::try_parse_from(["garagem-e2e", "run"]).is_err());
        }

        #[test]
        fn test_unknown_format_rejected() {
            assert!(Cli::try_parse_from(["garagem-e2e", "run", "s.yaml", "--format", "html"]).is_err());
        }
    }

    #[test]
    fn test_format_conversion() {
        assert_eq!(
            garagem_e2e::ReportFormat::from(ReportFormatArg::Json),
            garagem_e2e::ReportFormat::Json
        );
    }
}
