//! Hyperprotocols: ordered protocol references with snapshotted durations.
//!
//! One experiment alternates a fluidics block (`Hybridize N`) with an imaging
//! block. During imaging the fluidics side runs `Wait Microscopy 10^k`
//! protocols whose durations add up to the acquisition time, so both systems
//! hand control back and forth at known points.

use crate::catalog::{hybridize_name, Catalog};
use crate::error::{KilroyError, Result};
use crate::estimate::DurationEstimator;
use crate::xml::{self, Element};
use crate::{io, paths};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const HYPERPROTOCOLS_CONTAINERS: &[&str] = &["kilroy_hyperprotocols", "hyperprotocols"];
pub const HYPERPROTOCOL_TAG: &str = "hyperprotocol";
pub const STEP_TAG: &str = "protocol";
pub const WAIT_PREFIX: &str = "Wait Microscopy";

/// Imaging durations must fit in four decimal digits.
pub const MAX_IMAGING_SECS: u64 = 10_000;

const DECIMAL_PLACES: [u64; 4] = [1000, 100, 10, 1];

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HyperprotocolStep {
    pub protocol: String,
    pub duration_secs: u64,
}

impl HyperprotocolStep {
    pub fn new(protocol: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            protocol: protocol.into(),
            duration_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hyperprotocol {
    pub name: String,
    pub steps: Vec<HyperprotocolStep>,
}

impl Hyperprotocol {
    pub fn new(name: impl Into<String>, steps: Vec<HyperprotocolStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn total_secs(&self) -> u64 {
        self.steps
            .iter()
            .map(|s| s.duration_secs)
            .fold(0, u64::saturating_add)
    }

    fn to_element(&self) -> Element {
        self.steps.iter().fold(
            Element::new(HYPERPROTOCOL_TAG).with_attribute("name", self.name.clone()),
            |el, step| {
                el.with_child(Element::new(STEP_TAG).with_attribute("name", step.protocol.clone()))
            },
        )
    }
}

pub fn wait_name(secs: u64) -> String {
    format!("{WAIT_PREFIX} {secs}")
}

/// Nominal duration encoded in a `Wait Microscopy {n}` name.
pub fn parse_wait_name(name: &str) -> Option<u64> {
    name.strip_prefix(WAIT_PREFIX)?.trim().parse().ok()
}

/// Padding steps summing to `imaging_secs`: for each decimal digit `d` at
/// place `10^p`, `d` steps of `Wait Microscopy {10^p}`. Step count is the
/// digit sum, at most 36.
pub fn wait_padding(imaging_secs: u64) -> Result<Vec<HyperprotocolStep>> {
    if imaging_secs >= MAX_IMAGING_SECS {
        return Err(KilroyError::Range {
            value: imaging_secs,
            limit: MAX_IMAGING_SECS,
        });
    }
    let mut steps = Vec::new();
    for place in DECIMAL_PLACES {
        let digit = (imaging_secs / place) % 10;
        for _ in 0..digit {
            steps.push(HyperprotocolStep::new(wait_name(place), place));
        }
    }
    Ok(steps)
}

/// Snapshot duration of a step: the estimate of the catalog protocol when
/// there is one, else the nominal value of a `Wait Microscopy {n}` name.
fn resolve_duration(catalog: &Catalog, estimator: &DurationEstimator, protocol: &str) -> Result<u64> {
    if let Some(found) = catalog.get(protocol) {
        return Ok(estimator.total_duration(found));
    }
    parse_wait_name(protocol).ok_or_else(|| KilroyError::UnknownProtocol(protocol.to_string()))
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedHyperprotocol {
    pub hyperprotocol: Hyperprotocol,
    pub path: PathBuf,
    pub overwritten: bool,
}

pub struct HyperprotocolGenerator<'a> {
    catalog: &'a Catalog,
    estimator: &'a DurationEstimator,
}

impl<'a> HyperprotocolGenerator<'a> {
    pub fn new(catalog: &'a Catalog, estimator: &'a DurationEstimator) -> Self {
        Self { catalog, estimator }
    }

    /// For each hybe, a `Hybridize {n}` step with its estimated duration
    /// followed by wait padding for `imaging_secs`. Wait steps the catalog
    /// defines take the catalog estimate, as they do when loaded back.
    pub fn generate(&self, name: &str, hybes: &[u32], imaging_secs: u64) -> Result<Hyperprotocol> {
        if hybes.is_empty() {
            return Err(KilroyError::EmptyHybeList);
        }
        let padding = wait_padding(imaging_secs)?
            .into_iter()
            .map(|step| {
                let secs = resolve_duration(self.catalog, self.estimator, &step.protocol)?;
                Ok(HyperprotocolStep::new(step.protocol, secs))
            })
            .collect::<Result<Vec<_>>>()?;
        if imaging_secs == 0 {
            tracing::warn!(hyperprotocol = name, "imaging duration is zero; no wait steps");
        }

        let mut steps = Vec::with_capacity(hybes.len() * (padding.len() + 1));
        for &hybe in hybes {
            let protocol = self.catalog.require(&hybridize_name(hybe))?;
            steps.push(HyperprotocolStep::new(
                protocol.name.clone(),
                self.estimator.total_duration(protocol),
            ));
            steps.extend(padding.iter().cloned());
        }
        Ok(Hyperprotocol::new(name, steps))
    }

    /// Generate and write `<dir>/<file_name>.xml`. Nothing is written on error.
    pub fn write(
        &self,
        dir: &Path,
        file_name: &str,
        hybes: &[u32],
        imaging_secs: u64,
    ) -> Result<GeneratedHyperprotocol> {
        let name = paths::document_name(file_name)?;
        let path = paths::document_path(dir, file_name)?;

        let hyperprotocol = self.generate(&name, hybes, imaging_secs)?;
        let rendered = xml::render(&to_document(std::slice::from_ref(&hyperprotocol)))?;
        let overwritten = io::replace_file(&path, rendered.as_bytes())?;
        tracing::info!(
            path = %path.display(),
            steps = hyperprotocol.steps.len(),
            "generated hyperprotocol"
        );

        Ok(GeneratedHyperprotocol {
            hyperprotocol,
            path,
            overwritten,
        })
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

pub fn to_document(hyperprotocols: &[Hyperprotocol]) -> Element {
    let container = hyperprotocols.iter().fold(
        Element::new(HYPERPROTOCOLS_CONTAINERS[0]),
        |el, hp| el.with_child(hp.to_element()),
    );
    Element::new("kilroy_configuration")
        .with_attribute("num_valves", "1")
        .with_attribute("cnc", "True")
        .with_attribute("num_pumps", "1")
        .with_child(container)
}

/// Resolves step names to durations against a protocol catalog.
pub struct HyperprotocolLoader<'a> {
    catalog: &'a Catalog,
    estimator: &'a DurationEstimator,
}

impl<'a> HyperprotocolLoader<'a> {
    pub fn new(catalog: &'a Catalog, estimator: &'a DurationEstimator) -> Self {
        Self { catalog, estimator }
    }

    pub fn load(&self, path: &Path) -> Result<Vec<Hyperprotocol>> {
        let origin = path.display().to_string();
        let data = std::fs::read_to_string(path)
            .map_err(|e| KilroyError::config(origin.as_str(), e.to_string()))?;
        self.parse(&data, &origin)
    }

    /// Parse a document that must contain a hyperprotocol container.
    pub fn parse(&self, input: &str, origin: &str) -> Result<Vec<Hyperprotocol>> {
        let root = xml::parse(input, origin)?;
        self.from_document(&root, origin)?.ok_or_else(|| {
            KilroyError::config(
                origin,
                format!("missing <{}> container", HYPERPROTOCOLS_CONTAINERS[0]),
            )
        })
    }

    /// `None` when the document holds no hyperprotocol container at all.
    pub fn from_document(&self, root: &Element, origin: &str) -> Result<Option<Vec<Hyperprotocol>>> {
        let containers: Vec<&Element> = root.children_named(HYPERPROTOCOLS_CONTAINERS).collect();
        if containers.is_empty() {
            return Ok(None);
        }

        let mut out = Vec::new();
        for element in containers
            .into_iter()
            .flat_map(|c| c.children_named(&[HYPERPROTOCOL_TAG]))
        {
            let name = element
                .attribute("name")
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| KilroyError::config(origin, "hyperprotocol element without a name"))?;

            let mut steps = Vec::with_capacity(element.children.len());
            for step in element.children_named(&[STEP_TAG]) {
                let protocol = step.attribute("name").ok_or_else(|| {
                    KilroyError::config(origin, format!("step of '{name}' has no protocol name"))
                })?;
                let secs = resolve_duration(self.catalog, self.estimator, protocol)?;
                steps.push(HyperprotocolStep::new(protocol, secs));
            }

            if steps.is_empty() {
                tracing::warn!(origin, hyperprotocol = name, "skipping hyperprotocol with no steps");
                continue;
            }
            out.push(Hyperprotocol::new(name, steps));
        }
        Ok(Some(out))
    }

    /// Every hyperprotocol found in `dir/*.xml`, files in name order.
    /// Plain protocol documents are skipped, and so are files that fail to
    /// parse or name steps that cannot be resolved.
    pub fn load_dir(&self, dir: &Path) -> Result<Vec<Hyperprotocol>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == paths::XML_EXTENSION))
            .collect();
        files.sort();

        let mut out = Vec::new();
        for file in files {
            let origin = file.display().to_string();
            match self.read_document(&file, &origin) {
                Ok(Some(found)) => out.extend(found),
                Ok(None) => tracing::debug!(origin, "no hyperprotocols in document"),
                Err(e) => tracing::warn!(origin, error = %e, "skipping hyperprotocol file"),
            }
        }
        Ok(out)
    }

    fn read_document(&self, file: &Path, origin: &str) -> Result<Option<Vec<Hyperprotocol>>> {
        let data = std::fs::read_to_string(file)?;
        let root = xml::parse(&data, origin)?;
        self.from_document(&root, origin)
    }
}
