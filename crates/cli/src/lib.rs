pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::quote::MethodArg;

#[derive(Debug, Parser)]
#[command(
    name = "tillbot",
    about = "Tillbot operator CLI",
    long_about = "Check runtime readiness, inspect configuration, and preview quotes offline.",
    after_help = "Examples:\n  tillbot start\n  tillbot config\n  \
                  tillbot quote 700k --method points"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Price an amount with the configured rates and pass catalog")]
    Quote {
        #[arg(help = "Amount as a customer would type it, e.g. 700k, \"1 mil 750k\", max")]
        amount: String,
        #[arg(long, value_enum, help = "Only quote one payment method")]
        method: Option<MethodArg>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Quote { amount, method } => commands::quote::run(&amount, method),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
