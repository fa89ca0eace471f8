// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod convert;
mod error;
mod formats;
mod info;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::process::ExitCode;

/// VSP Filter CLI - Hardware colorspace conversion and scaling tool
#[derive(Parser)]
#[command(name = "vspfilter")]
#[command(version)]
#[command(about = "VSP Filter CLI - Hardware colorspace conversion and scaling tool")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=debug for more)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print results in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the VSP devices and their media graph
    Info(info::Args),

    /// List the pixel formats the VSP can read and write
    Formats(formats::Args),

    /// Convert raw video frames from one file to another through the VSP
    Convert(convert::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Info(args) => info::execute(args, cli.json),
        Commands::Formats(args) => formats::execute(args, cli.json),
        Commands::Convert(args) => convert::execute(args, cli.json),
    };

    result_to_exit_code(result)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("Logging initialized");
}
