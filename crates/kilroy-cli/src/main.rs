mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    catalog::CatalogSubcommand, config::ConfigSubcommand, hyper::HyperSubcommand,
    protocol::ProtocolSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kilroy",
    about = "Generate fluidics protocols and sequence hyperprotocols for kilroy",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: nearest ancestor holding kilroy.yaml)
    #[arg(long, global = true, env = "KILROY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default kilroy.yaml and protocols directory
    Init,

    /// Show or validate kilroy.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Inspect the protocol catalog
    Catalog {
        #[command(subcommand)]
        subcommand: CatalogSubcommand,
    },

    /// Estimate per-cycle and total fluidics time for a list of hybes
    Estimate {
        /// Hybes, e.g. "1-8 12" or "10" for 1..=10 (default: generator.default_num_hybes)
        #[arg(long)]
        hybes: Option<String>,
        /// Hybes to leave out, same syntax
        #[arg(long)]
        ignore: Option<String>,
    },

    /// Generate composite protocols
    Protocol {
        #[command(subcommand)]
        subcommand: ProtocolSubcommand,
    },

    /// Generate, inspect and run hyperprotocols
    Hyper {
        #[command(subcommand)]
        subcommand: HyperSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Hyper {
            subcommand: HyperSubcommand::Run { .. },
        } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Catalog { subcommand } => cmd::catalog::run(&root, subcommand, cli.json),
        Commands::Estimate { hybes, ignore } => {
            cmd::estimate::run(&root, hybes.as_deref(), ignore.as_deref(), cli.json)
        }
        Commands::Protocol { subcommand } => cmd::protocol::run(&root, subcommand, cli.json),
        Commands::Hyper { subcommand } => cmd::hyper::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
