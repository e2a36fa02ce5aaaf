pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "dialflow",
    about = "Dialflow operator CLI",
    long_about = "Inspect configuration, check telephony readiness, and rehearse call scripts.",
    after_help = "Examples:\n  dialflow doctor --json\n  dialflow config\n  \
                  dialflow simulate --turn \"Sure\" --turn \"We use spreadsheets\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration with source attribution and redaction")]
    Config,
    #[command(about = "Validate config, script templates, and telephony readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Dispatch a submission in-process against scripted callers")]
    Simulate {
        #[arg(long, conflicts_with = "turn", help = "JSON scenario file")]
        script: Option<PathBuf>,
        #[arg(long = "turn", help = "Caller utterance; repeat for each turn")]
        turn: Vec<String>,
        #[arg(long, default_value = "qualify_interest", help = "Call goal for --turn mode")]
        goal: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Simulate { script, turn, goal } => {
            let source = match script {
                Some(path) => commands::simulate::ScenarioSource::File(path),
                None => commands::simulate::ScenarioSource::Turns { turns: turn, goal },
            };
            commands::simulate::run(source)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
