use crate::cmd::Workspace;
use crate::output::{format_secs, print_json};
use clap::Subcommand;
use kilroy_core::generate::ProtocolGenerator;
use std::path::Path;

#[derive(Subcommand)]
pub enum ProtocolSubcommand {
    /// Concatenate Hybridize protocols with a Stop Flow hold after each
    Generate {
        /// Hybes in run order, e.g. "4 5 6 10", "1-8" or "3 1 3"; repeats are kept
        #[arg(long)]
        hybes: Option<String>,
        /// Hybes to leave out, same syntax
        #[arg(long)]
        ignore: Option<String>,
        /// Seconds to hold flow after each cycle while imaging
        #[arg(long)]
        imaging: Option<u64>,
        /// Output file name inside the protocols directory
        #[arg(long, default_value = "new_protocol.xml")]
        name: String,
        /// Hybe count used when --hybes is omitted
        #[arg(long)]
        num_hybes: Option<u32>,
    },
}

pub fn run(root: &Path, subcmd: ProtocolSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ProtocolSubcommand::Generate {
            hybes,
            ignore,
            imaging,
            name,
            num_hybes,
        } => {
            let ws = Workspace::load(root)?;
            let list = ws.select_sequence(hybes.as_deref(), ignore.as_deref(), num_hybes)?;
            let imaging = imaging.unwrap_or(ws.config.generator.default_imaging_secs);

            let out = ProtocolGenerator::new(&ws.catalog, &ws.estimator).write(
                &ws.protocols_path(),
                &name,
                list.as_slice(),
                imaging,
            )?;

            if json {
                return print_json(&out);
            }
            if out.overwritten {
                println!("Replaced existing file.");
            }
            println!("Wrote protocol '{}' to {}", out.protocol.name, out.path.display());
            println!("  hybes:         {list}");
            println!("  commands:      {}", out.protocol.commands.len());
            println!("  longest cycle: {}", format_secs(out.estimate.max_secs));
            Ok(())
        }
    }
}
