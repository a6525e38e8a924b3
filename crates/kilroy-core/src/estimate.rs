use crate::catalog::{hybridize_name, Catalog, DeviceType, Protocol};
use crate::config::TimingConfig;
use crate::error::{KilroyError, Result};
use serde::Serialize;

pub const IMAGING_BUFFER: &str = "Imaging Buffer";
pub const WASH_BUFFER: &str = "Wash Buffer";
pub const BLEACH_BUFFER: &str = "Bleach Buffer";

/// Estimated time of one hybridization cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleEstimate {
    pub hybe: u32,
    pub protocol: String,
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurationSummary {
    pub cycles: Vec<CycleEstimate>,
    pub total_secs: u64,
    /// Longest single cycle; bounds how often the microscope can image.
    pub max_secs: u64,
}

/// Wall-clock estimates for protocols, including reagent-switch settling.
#[derive(Debug, Clone, Default)]
pub struct DurationEstimator {
    timing: TimingConfig,
}

impl DurationEstimator {
    pub fn new(timing: TimingConfig) -> Self {
        Self { timing }
    }

    /// Pump commands count their own duration; every other command costs the
    /// fixed valve overhead plus the buffer-specific overhead for its action.
    pub fn total_duration(&self, protocol: &Protocol) -> u64 {
        protocol
            .commands
            .iter()
            .map(|cmd| match cmd.device {
                DeviceType::Pump => cmd.duration_secs,
                DeviceType::Valve | DeviceType::Unknown(_) => self
                    .timing
                    .time_buffer_secs
                    .saturating_add(self.buffer_overhead(&cmd.action)),
            })
            .fold(0, u64::saturating_add)
    }

    fn buffer_overhead(&self, action: &str) -> u64 {
        match action {
            IMAGING_BUFFER => self.timing.imaging_buffer_secs,
            WASH_BUFFER => self.timing.wash_buffer_secs,
            BLEACH_BUFFER => self.timing.bleach_buffer_secs,
            _ => 0,
        }
    }

    /// Per-cycle, total and longest estimates for `hybes`, resolved as
    /// `Hybridize {n}` protocols in `catalog`.
    pub fn aggregate(&self, catalog: &Catalog, hybes: &[u32]) -> Result<DurationSummary> {
        if hybes.is_empty() {
            return Err(KilroyError::EmptyHybeList);
        }
        let mut cycles = Vec::with_capacity(hybes.len());
        for &hybe in hybes {
            let name = hybridize_name(hybe);
            let seconds = self.total_duration(catalog.require(&name)?);
            cycles.push(CycleEstimate {
                hybe,
                protocol: name,
                seconds,
            });
        }
        let total_secs = cycles.iter().map(|c| c.seconds).fold(0, u64::saturating_add);
        let max_secs = cycles.iter().map(|c| c.seconds).max().unwrap_or(0);
        Ok(DurationSummary {
            cycles,
            total_secs,
            max_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::catalog;
    use crate::catalog::Command;

    #[test]
    fn pump_only_protocol_sums_exactly() {
        let est = DurationEstimator::default();
        let cat = catalog();
        assert_eq!(est.total_duration(cat.require("Pumps Only").unwrap()), 15);
    }

    #[test]
    fn valve_overheads_follow_action_text() {
        let est = DurationEstimator::default();
        let cat = catalog();
        // 10 + 120 + (10 + 20) + 60
        assert_eq!(est.total_duration(cat.require("Hybridize 1").unwrap()), 220);
        // 10 + 100 + (10 + 20) + 30
        assert_eq!(est.total_duration(cat.require("Hybridize 2").unwrap()), 170);
        // (10 + 20) + 50
        assert_eq!(est.total_duration(cat.require("Hybridize 3").unwrap()), 80);
    }

    #[test]
    fn overheads_are_configurable() {
        let est = DurationEstimator::new(TimingConfig {
            time_buffer_secs: 1,
            imaging_buffer_secs: 2,
            wash_buffer_secs: 3,
            bleach_buffer_secs: 4,
        });
        let p = Protocol::new(
            "p",
            vec![
                Command::valve("Wash Buffer", 999),
                Command::valve("Bleach Buffer", 0),
                Command::valve("Imaging Buffer", 0),
                Command::valve("Hybe 4", 0),
            ],
        );
        assert_eq!(est.total_duration(&p), (1 + 3) + (1 + 4) + (1 + 2) + 1);
    }

    #[test]
    fn huge_durations_saturate() {
        let est = DurationEstimator::default();
        let p = Protocol::new(
            "long",
            vec![Command::pump("Flow", u64::MAX), Command::pump("Flow", 1)],
        );
        assert_eq!(est.total_duration(&p), u64::MAX);
    }

    #[test]
    fn empty_protocol_is_zero() {
        let est = DurationEstimator::default();
        assert_eq!(est.total_duration(&Protocol::new("e", vec![])), 0);
    }

    #[test]
    fn estimate_is_deterministic() {
        let est = DurationEstimator::default();
        let cat = catalog();
        for p in cat.protocols() {
            assert_eq!(est.total_duration(p), est.total_duration(p));
        }
    }

    #[test]
    fn aggregate_reports_total_and_max() {
        let est = DurationEstimator::default();
        let summary = est.aggregate(&catalog(), &[1, 2, 3]).unwrap();
        assert_eq!(summary.total_secs, 220 + 170 + 80);
        assert_eq!(summary.max_secs, 220);
        assert_eq!(summary.cycles[1].protocol, "Hybridize 2");
    }

    #[test]
    fn aggregate_rejects_unknown_and_empty() {
        let est = DurationEstimator::default();
        assert!(matches!(
            est.aggregate(&catalog(), &[1, 7]),
            Err(KilroyError::UnknownProtocol(ref n)) if n == "Hybridize 7"
        ));
        assert!(matches!(
            est.aggregate(&catalog(), &[]),
            Err(KilroyError::EmptyHybeList)
        ));
    }
}
