mod catalog_file;
mod cli;
mod commands;
mod config;
mod resource;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, StateCommand};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

/// Exit status for errors found before any resource was applied
const EXIT_ERROR: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match run(&ctx, cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<u8> {
    let settings = config::Settings::load()?;
    match command {
        Command::Apply(args) => commands::apply::run(ctx, &args, &settings),
        Command::Graph(args) => commands::graph::run(&args.catalog).map(|()| 0),
        Command::State(cmd) => {
            match cmd {
                StateCommand::Show { state, resource } => {
                    let path = settings.state_path(state.as_deref())?;
                    commands::state::show(&path, resource.as_deref())?;
                }
                StateCommand::Clear { state } => {
                    let path = settings.state_path(state.as_deref())?;
                    commands::state::clear(&path)?;
                }
            }
            Ok(0)
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "converge", &mut io::stdout());
            Ok(0)
        }
    }
}
