use anyhow::Context;
use kilroy_core::config::Config;
use kilroy_core::{io, paths};
use std::path::Path;

use crate::output::print_json;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let defaults = serde_yaml::to_string(&Config::default())?;
    let created_config = io::write_if_missing(&paths::config_path(root), defaults.as_bytes())
        .context("failed to write kilroy.yaml")?;

    let config = Config::load(root).context("failed to load config")?;
    let protocols = config.protocols_path(root);
    let created_protocols = !protocols.is_dir();
    std::fs::create_dir_all(&protocols)
        .with_context(|| format!("failed to create {}", protocols.display()))?;

    let catalog = config.catalog_path(root);
    let has_catalog = catalog.is_file();

    if json {
        return print_json(&serde_json::json!({
            "root": root,
            "config_created": created_config,
            "protocols_dir_created": created_protocols,
            "catalog_found": has_catalog,
        }));
    }

    println!("Initializing kilroy in: {}", root.display());
    let status = |created: bool| if created { "created:" } else { "exists: " };
    println!("  {} {}", status(created_config), paths::CONFIG_FILE);
    println!("  {} {}", status(created_protocols), config.protocols_dir.display());
    if !has_catalog {
        println!(
            "  missing: {} (copy the fluidics protocol document here before generating)",
            config.catalog.display()
        );
    }
    Ok(())
}
