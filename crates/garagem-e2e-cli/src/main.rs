//! garagem-e2e CLI: run the Garagem40 end-to-end suite
//!
//! ## Usage
//!
//! ```bash
//! garagem-e2e list scenarios/garagem40.yaml
//! garagem-e2e validate scenarios/garagem40.yaml
//! garagem-e2e run scenarios/garagem40.yaml                      # every scenario
//! garagem-e2e run scenarios/garagem40.yaml -s TC001-login-admin # one scenario
//! garagem-e2e run scenarios/garagem40.yaml --format junit -o report.xml
//! ```
//!
//! Exit status: 0 when every scenario passed, 1 when any scenario failed,
//! 2 when the suite could not be run at all.

use clap::Parser;
use garagem_e2e_cli::{handlers, logging, Cli, CliConfig, CliResult, Commands, Verbosity};
use std::process::ExitCode;

const EXIT_SCENARIO_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    logging::init(config.verbosity, cli.log_format)?;

    match cli.command {
        Commands::Run(args) => {
            let all_passed = handlers::run(&config, &args)?;
            Ok(if all_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_SCENARIO_FAILED)
            })
        }
        Commands::Validate(args) => {
            handlers::validate(&config, &args)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List(args) => {
            handlers::list(&config, &args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into())
}
