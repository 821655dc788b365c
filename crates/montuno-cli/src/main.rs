//! montuno - render salsa piano montunos from chord progressions
//!
//! Subcommands:
//! - `montuno render "<progression>" --out file.mid` - Render to a MIDI file
//! - `montuno parse "<progression>"` - Show slot assignments and bass plan
//! - `montuno config` - Print the effective configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "montuno")]
#[command(about = "Salsa piano montuno renderer")]
#[command(version)]
struct Cli {
    /// Config file, used in place of ./montuno.toml
    #[arg(long, global = true, env = "MONTUNO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a progression to a Standard MIDI File
    Render {
        /// Progression, e.g. "Dm7 G7 | C∆ | %"
        progression: String,

        /// Output .mid path
        #[arg(short, long)]
        out: PathBuf,

        #[command(flatten)]
        render: commands::RenderArgs,
    },

    /// Segment a progression and print its slots and bass plan
    Parse {
        progression: String,

        /// Clave pattern name
        #[arg(long)]
        clave: Option<String>,

        /// First-chord inversion (root, third, fifth, seventh, auto)
        #[arg(long)]
        inversion: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = montunoconf::MontunoConfig::load_with_sources_from(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.telemetry.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    tracing::debug!(files = ?sources.files, env = ?sources.env_overrides, "configuration loaded");

    match cli.command {
        Commands::Render {
            progression,
            out,
            render,
        } => {
            commands::render(&config, &progression, &out, &render)?;
        }
        Commands::Parse {
            progression,
            clave,
            inversion,
        } => {
            commands::parse(&config, &progression, clave.as_deref(), inversion.as_deref())?;
        }
        Commands::Config => {
            commands::show_config(&config, &sources);
        }
    }

    Ok(())
}
