mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// strata - lazy rule generation for multi-context builds
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Workspace root
  #[arg(long, global = true, default_value = ".")]
  root: PathBuf,

  /// Only generate rules for stanzas of these packages
  #[arg(long, global = true, value_delimiter = ',')]
  only_packages: Option<Vec<String>>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve targets and print the rules needed to build them
  Build {
    /// Targets: paths, `@alias`, `@@alias` or `%{..}` templates
    #[arg(default_value = "@default")]
    targets: Vec<String>,
  },

  /// Print the rules and retention of a build directory
  Rules {
    /// Build directory, e.g. `_build/default/src`
    dir: String,
  },

  /// List the targets of a build directory
  Targets {
    /// Build directory or source directory (default: the root)
    dir: Option<String>,
  },

  /// Remove build outputs no rule produces
  Clean {
    /// Report what would be removed without deleting
    #[arg(long)]
    dry_run: bool,

    /// Context to clean (default: every context)
    #[arg(long)]
    context: Option<String>,
  },

  /// Show contexts and project metadata
  Info,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let opts = cmd::Options {
    root: cli.root,
    only_packages: cli.only_packages,
    output: cli.output,
  };

  match cli.command {
    Commands::Build { targets } => cmd::cmd_build(&opts, &targets),
    Commands::Rules { dir } => cmd::cmd_rules(&opts, &dir),
    Commands::Targets { dir } => cmd::cmd_targets(&opts, dir.as_deref()),
    Commands::Clean { dry_run, context } => cmd::cmd_clean(&opts, dry_run, context.as_deref()),
    Commands::Info => cmd::cmd_info(&opts),
  }
}
