use std::process::ExitCode;

use clap::{Parser, Subcommand};
use splitbox::command::{FilterCMD, PipelineCMD, SplitTagCMD};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

///////////////////////////////
/// Possible subcommands to parse
#[derive(Subcommand)]
enum Commands {
    Filter(FilterCMD),
    SplitTag(SplitTagCMD),
    Pipeline(PipelineCMD),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Filter(mut cmd) => cmd.try_execute(),
        Commands::SplitTag(mut cmd) => cmd.try_execute(),
        Commands::Pipeline(mut cmd) => cmd.try_execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
