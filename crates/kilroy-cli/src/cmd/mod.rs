pub mod catalog;
pub mod config;
pub mod estimate;
pub mod hyper;
pub mod init;
pub mod protocol;

use anyhow::Context;
use kilroy_core::catalog::Catalog;
use kilroy_core::config::Config;
use kilroy_core::estimate::DurationEstimator;
use kilroy_core::hybe::HybeList;
use std::path::{Path, PathBuf};

/// Config, catalog and estimator for one command invocation.
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub catalog: Catalog,
    pub estimator: DurationEstimator,
}

impl Workspace {
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root).context("failed to load config")?;
        let catalog_path = config.catalog_path(root);
        let catalog = Catalog::load(&catalog_path).with_context(|| {
            format!("failed to load protocol catalog {}", catalog_path.display())
        })?;
        let estimator = DurationEstimator::new(config.timing.clone());
        Ok(Self {
            root: root.to_path_buf(),
            config,
            catalog,
            estimator,
        })
    }

    pub fn protocols_path(&self) -> PathBuf {
        self.config.protocols_path(&self.root)
    }

    /// Parse the operator's hybe list, defaulting to `1..=fallback`.
    pub fn select_hybes(
        &self,
        hybes: Option<&str>,
        ignore: Option<&str>,
        fallback: Option<u32>,
    ) -> anyhow::Result<HybeList> {
        let ignore = ignore.unwrap_or("");
        let list = match hybes {
            Some(input) => HybeList::parse(input, ignore)?,
            None => self.default_hybes(ignore, fallback)?,
        };
        Ok(list)
    }

    /// Like [`Workspace::select_hybes`], but an explicit list is taken as a
    /// run order: no sorting, repeats kept, a single number is one cycle.
    pub fn select_sequence(
        &self,
        hybes: Option<&str>,
        ignore: Option<&str>,
        fallback: Option<u32>,
    ) -> anyhow::Result<HybeList> {
        let ignore = ignore.unwrap_or("");
        let list = match hybes {
            Some(input) => HybeList::parse_sequence(input, ignore)?,
            None => self.default_hybes(ignore, fallback)?,
        };
        Ok(list)
    }

    fn default_hybes(&self, ignore: &str, fallback: Option<u32>) -> anyhow::Result<HybeList> {
        let count = fallback.unwrap_or(self.config.generator.default_num_hybes);
        tracing::warn!("no hybe list given, using hybes 1-{count}");
        Ok(HybeList::parse(&count.to_string(), ignore)?)
    }
}
