pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "tastebud",
    about = "Tastebud operator CLI",
    long_about = "Operate the Tastebud recommendation service: migrations, readiness checks, \
                  config inspection, demo data, and per-user recommendation runs.",
    after_help = "Examples:\n  tastebud doctor --json\n  tastebud seed\n  tastebud recommend --user ana --limit 5"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the campus demo catalog and replay its purchase history")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity, and schema version")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print a user's recommendation feed, running cold start if it is empty")]
    Recommend {
        #[arg(long, help = "User id to read recommendations for")]
        user: String,
        #[arg(long, help = "Maximum number of items (defaults to recommendations.default_limit)")]
        limit: Option<usize>,
    },
    #[command(about = "Purge expired recommendations and rebuild them from behavior profiles")]
    Regenerate {
        #[arg(long, help = "User id to regenerate recommendations for")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Recommend { user, limit } => commands::recommend::run(&user, limit),
        Command::Regenerate { user } => commands::regenerate::run(&user),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn recommend_parses_user_and_optional_limit() {
        let cli = Cli::try_parse_from(["tastebud", "recommend", "--user", "ana", "--limit", "3"])
            .expect("parse");

        assert!(matches!(
            cli.command,
            Command::Recommend { ref user, limit: Some(3) } if user == "ana"
        ));
    }

    #[test]
    fn regenerate_requires_a_user() {
        assert!(Cli::try_parse_from(["tastebud", "regenerate"]).is_err());
    }
}
