use crate::catalog::{hybridize_name, Catalog, Command, Protocol};
use crate::error::{KilroyError, Result};
use crate::estimate::{DurationEstimator, DurationSummary};
use crate::{io, paths};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Action of the hold step appended after every cycle while the microscope images.
pub const STOP_FLOW: &str = "Stop Flow";

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedProtocol {
    pub protocol: Protocol,
    pub path: PathBuf,
    pub overwritten: bool,
    pub estimate: DurationSummary,
}

/// Builds one composite protocol covering several hybridization cycles.
pub struct ProtocolGenerator<'a> {
    catalog: &'a Catalog,
    estimator: &'a DurationEstimator,
}

impl<'a> ProtocolGenerator<'a> {
    pub fn new(catalog: &'a Catalog, estimator: &'a DurationEstimator) -> Self {
        Self { catalog, estimator }
    }

    /// Concatenate the `Hybridize {n}` commands for every hybe in caller
    /// order, each followed by a pump `Stop Flow` hold of `imaging_secs`.
    pub fn generate(&self, name: &str, hybes: &[u32], imaging_secs: u64) -> Result<Protocol> {
        if hybes.is_empty() {
            return Err(KilroyError::EmptyHybeList);
        }
        if imaging_secs == 0 {
            tracing::warn!(protocol = name, "imaging duration is zero; hold steps will be empty");
        }

        let mut commands = Vec::new();
        for &hybe in hybes {
            let base = self.catalog.require(&hybridize_name(hybe))?;
            commands.extend(base.commands.iter().cloned());
            commands.push(Command::pump(STOP_FLOW, imaging_secs));
        }
        Ok(Protocol::new(name, commands))
    }

    /// Generate and write `<dir>/<file_name>.xml`: the source catalog document
    /// plus the new protocol. Nothing is written if any cycle fails to resolve.
    pub fn write(
        &self,
        dir: &Path,
        file_name: &str,
        hybes: &[u32],
        imaging_secs: u64,
    ) -> Result<GeneratedProtocol> {
        let name = paths::document_name(file_name)?;
        let path = paths::document_path(dir, file_name)?;

        let protocol = self.generate(&name, hybes, imaging_secs)?;
        let estimate = self.estimator.aggregate(self.catalog, hybes)?;
        let extended = self.catalog.with_protocol(protocol.clone())?;
        let rendered = extended.render()?;

        let overwritten = io::replace_file(&path, rendered.as_bytes())?;
        tracing::info!(
            path = %path.display(),
            commands = protocol.commands.len(),
            "generated protocol"
        );

        Ok(GeneratedProtocol {
            protocol,
            path,
            overwritten,
            estimate,
        })
    }
}
