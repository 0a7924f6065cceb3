mod cli;
mod commands;
mod run;

use std::ffi::OsString;

use anyhow::{Context as _, Result};
use clap::Parser;
use engine_logging::{engine_error, LogDestination};
use harvester_engine::PipelineConfig;
use log::LevelFilter;

use crate::cli::{Cli, Command};

/// Settings and the global flags child processes must inherit.
pub struct Context {
    pub config: PipelineConfig,
    pub forwarded: Vec<OsString>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let destination = match &cli.log_file {
        Some(path) => LogDestination::Both(path.clone()),
        None => LogDestination::Terminal,
    };
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    engine_logging::initialize(destination, level).context("cannot open log file")?;

    let result = dispatch(cli);
    if let Err(err) = &result {
        engine_error!("{err:#}");
    }
    result
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    let mut forwarded = Vec::new();
    if let Some(path) = &cli.config {
        forwarded.push(OsString::from("--config"));
        forwarded.push(path.clone().into_os_string());
    }
    if cli.verbose {
        forwarded.push(OsString::from("--verbose"));
    }
    let ctx = Context { config, forwarded };

    match cli.command {
        Command::Harvest(args) => commands::harvest(&args),
        Command::Download(args) => commands::download(&ctx, &args),
        Command::Extract(args) => commands::extract(&ctx, &args),
        Command::ExtractOne(args) => commands::extract_one(&ctx, &args),
        Command::Filter(args) => commands::filter(&ctx, &args),
        Command::Cleanup(args) => commands::cleanup(&args),
        Command::Run(args) => {
            let log_file = cli
                .log_file
                .context("`run` needs --log-file to record completion")?;
            run::run_archive(&ctx, &args, &log_file)
        }
        Command::Submit(args) => run::submit(&ctx, &args),
    }
}
