use crate::cmd::Workspace;
use crate::output::{format_secs, print_json, print_table};
use clap::Subcommand;
use serde::Serialize;
use std::path::Path;

#[derive(Subcommand)]
pub enum CatalogSubcommand {
    /// List every protocol with its nominal and estimated duration
    List,

    /// Show the commands of one protocol
    Show {
        /// Protocol name, e.g. "Hybridize 3"
        name: String,
    },
}

#[derive(Serialize)]
struct ProtocolRow<'a> {
    name: &'a str,
    commands: usize,
    nominal_secs: u64,
    estimated_secs: u64,
}

pub fn run(root: &Path, subcmd: CatalogSubcommand, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::load(root)?;
    match subcmd {
        CatalogSubcommand::List => list(&ws, json),
        CatalogSubcommand::Show { name } => show(&ws, &name, json),
    }
}

fn list(ws: &Workspace, json: bool) -> anyhow::Result<()> {
    let rows: Vec<ProtocolRow> = ws
        .catalog
        .protocols()
        .map(|p| ProtocolRow {
            name: &p.name,
            commands: p.commands.len(),
            nominal_secs: p.nominal_duration(),
            estimated_secs: ws.estimator.total_duration(p),
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No protocols in catalog.");
        return Ok(());
    }
    print_table(
        &["NAME", "COMMANDS", "NOMINAL", "ESTIMATED"],
        rows.iter()
            .map(|r| {
                vec![
                    r.name.to_string(),
                    r.commands.to_string(),
                    format_secs(r.nominal_secs),
                    format_secs(r.estimated_secs),
                ]
            })
            .collect(),
    );
    Ok(())
}

fn show(ws: &Workspace, name: &str, json: bool) -> anyhow::Result<()> {
    let protocol = ws.catalog.require(name)?;
    let estimated = ws.estimator.total_duration(protocol);

    if json {
        return print_json(&serde_json::json!({
            "protocol": protocol,
            "estimated_secs": estimated,
        }));
    }

    println!("{} (estimated {})", protocol.name, format_secs(estimated));
    print_table(
        &["#", "DEVICE", "DURATION", "ACTION"],
        protocol
            .commands
            .iter()
            .enumerate()
            .map(|(i, c)| {
                vec![
                    i.to_string(),
                    c.device.to_string(),
                    format!("{}s", c.duration_secs),
                    c.action.clone(),
                ]
            })
            .collect(),
    );
    Ok(())
}
