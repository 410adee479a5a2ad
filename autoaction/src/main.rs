//! Scenario runner for the autoaction engine.
//!
//! `check` validates a scenario file; `replay` mounts the declared actions
//! against a scripted store and prints every handler invocation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use autoaction::exit_codes;
use autoaction::io::scenario::load_scenario;
use autoaction::logging;
use autoaction::replay::replay_file;

#[derive(Parser)]
#[command(
    name = "autoaction",
    version,
    about = "Replay change-driven action scenarios"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a scenario against the schema and its invariants.
    Check {
        /// Scenario TOML file.
        path: PathBuf,
    },
    /// Replay a scenario and print handler invocations in order.
    Replay {
        /// Scenario TOML file.
        path: PathBuf,
        /// Print the full outcome as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check { path } => cmd_check(path),
        Command::Replay { path, json } => cmd_replay(path, json),
    }
}

fn cmd_check(path: PathBuf) -> Result<i32> {
    let scenario = load_scenario(&path)?;
    println!(
        "ok: {} actions, {} steps",
        scenario.actions.len(),
        scenario.steps.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_replay(path: PathBuf, json: bool) -> Result<i32> {
    let outcome = replay_file(&path)?;
    if json {
        let payload = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
        println!("{}", payload);
    } else {
        for line in outcome.summary_lines() {
            println!("{}", line);
        }
    }

    if outcome.failures.is_empty() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::HANDLER_FAILED)
    }
}
