use crate::cmd::Workspace;
use crate::output::{format_secs, print_json, print_table};
use std::path::Path;

pub fn run(
    root: &Path,
    hybes: Option<&str>,
    ignore: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let ws = Workspace::load(root)?;
    let list = ws.select_hybes(hybes, ignore, None)?;
    let summary = ws.estimator.aggregate(&ws.catalog, list.as_slice())?;

    if json {
        return print_json(&summary);
    }

    print_table(
        &["HYBE", "PROTOCOL", "ESTIMATED"],
        summary
            .cycles
            .iter()
            .map(|c| vec![c.hybe.to_string(), c.protocol.clone(), format_secs(c.seconds)])
            .collect(),
    );
    println!();
    println!("Total fluidics time:  {}", format_secs(summary.total_secs));
    println!("Longest single cycle: {}", format_secs(summary.max_secs));
    Ok(())
}
