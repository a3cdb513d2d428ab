//! Baton CLI - Command-line interface for the composition engine
//!
//! Provides subcommands for compiling a composition to its state machine and
//! for driving single conductor invocations, which makes it easy to inspect
//! and step through compositions without a platform.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use baton::{compile, Composition, Conductor, State};

#[derive(Parser)]
#[command(name = "baton")]
#[command(about = "Serverless composition engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a composition (serialized AST) to its state machine
    Compile {
        /// Path to the composition JSON
        composition: PathBuf,
    },

    /// Run one conductor invocation against a compiled machine
    Run {
        /// Path to the state machine JSON
        fsm: PathBuf,

        /// Invocation params as inline JSON (may carry $resume)
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile { composition } => {
            let source = fs::read_to_string(&composition)
                .with_context(|| format!("reading {}", composition.display()))?;
            let value = serde_json::from_str(&source).context("parsing composition JSON")?;
            let composition = Composition::from_value(value)?;
            let fsm = compile(&composition);
            println!("{}", serde_json::to_string_pretty(&fsm)?);
        }
        Commands::Run { fsm, params } => {
            let source =
                fs::read_to_string(&fsm).with_context(|| format!("reading {}", fsm.display()))?;
            let states: Vec<State> = serde_json::from_str(&source).context("parsing machine JSON")?;
            baton::fsm::validate_offsets(&states)
                .map_err(|message| anyhow::anyhow!("invalid machine: {message}"))?;
            let params = serde_json::from_str(&params).context("parsing params JSON")?;
            let outcome = Conductor::new(states).activate(params);
            println!("{}", serde_json::to_string_pretty(&outcome.to_value())?);
        }
    }
    Ok(())
}
