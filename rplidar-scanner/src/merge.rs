//! Merging of successive sweeps into one denser sweep.
//!
//! Low density sensors rarely cover the whole circle in one rotation. The
//! merger keeps the best sample of each 2 degree bin across sweeps until the
//! merged sweep covers enough of the circle, stops improving, or too many
//! sweeps have gone in.

use crate::config::SessionConfig;
use crate::coverage::{bin_of, Coverage};
use rplidar_data::{RawSample, Rotation};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

/// Smallest coverage change that still counts as progress.
const PLATEAU_DELTA: f64 = 0.01;

/// Why a merge needs no further sweeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    CoverageMet,
    Plateau,
    RotationLimit,
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            MergeOutcome::CoverageMet => "coverage reached",
            MergeOutcome::Plateau => "coverage stopped improving",
            MergeOutcome::RotationLimit => "sweep limit reached",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug)]
pub struct RotationMerger {
    min_coverage: f64,
    max_gap_deg: f64,
    max_rotations: u32,
    plateau_rotations: u32,
    bins: BTreeMap<usize, RawSample>,
    rejected: usize,
    rotations: u32,
    last_coverage: f64,
    plateau: u32,
}

impl RotationMerger {
    pub fn new(config: &SessionConfig) -> RotationMerger {
        RotationMerger {
            min_coverage: config.min_coverage,
            max_gap_deg: config.max_gap_deg,
            max_rotations: config.max_merged_rotations.max(1),
            plateau_rotations: config.plateau_rotations.max(1),
            bins: BTreeMap::new(),
            rejected: 0,
            rotations: 0,
            last_coverage: 0.,
            plateau: 0,
        }
    }

    /// Folds a sealed sweep in and returns the coverage of the merge so far.
    /// A bin keeps its first sample unless a later one has better quality.
    pub fn add(&mut self, rotation: &Rotation) -> Coverage {
        for sample in rotation.accepted.iter().filter(|s| s.has_return()) {
            match self.bins.entry(bin_of(sample.angle_deg)) {
                Entry::Vacant(slot) => {
                    slot.insert(*sample);
                }
                Entry::Occupied(mut slot) => {
                    if sample.quality > slot.get().quality {
                        slot.insert(*sample);
                    }
                }
            }
        }
        self.rejected += rotation.rejected;
        self.rotations += 1;

        let coverage = self.coverage();
        if (coverage.coverage - self.last_coverage).abs() < PLATEAU_DELTA {
            self.plateau += 1;
        } else {
            self.plateau = 0;
        }
        self.last_coverage = coverage.coverage;
        coverage
    }

    pub fn coverage(&self) -> Coverage {
        Coverage::of_angles(self.bins.values().map(|s| s.angle_deg))
    }

    /// Sweeps merged so far.
    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    pub fn is_empty(&self) -> bool {
        self.rotations == 0
    }

    /// `Some` once no further sweep is needed.
    pub fn outcome(&self) -> Option<MergeOutcome> {
        if self.is_empty() {
            return None;
        }
        if self.coverage().is_acceptable(self.min_coverage, self.max_gap_deg) {
            Some(MergeOutcome::CoverageMet)
        } else if self.plateau >= self.plateau_rotations && self.rotations >= self.plateau_rotations
        {
            Some(MergeOutcome::Plateau)
        } else if self.rotations >= self.max_rotations {
            Some(MergeOutcome::RotationLimit)
        } else {
            None
        }
    }

    /// The merged sweep, ordered by heading.
    pub fn rotation(&self) -> Rotation {
        Rotation {
            accepted: self.bins.values().copied().collect(),
            rejected: self.rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(samples: &[(u8, f64)]) -> Rotation {
        Rotation {
            accepted: samples
                .iter()
                .map(|&(quality, angle)| RawSample::new(quality, angle, 1000.))
                .collect(),
            rejected: 1,
        }
    }

    /// One sample every `step` degrees starting at `offset`.
    fn spaced(step: f64, offset: f64, quality: u8) -> Rotation {
        let samples: Vec<(u8, f64)> = (0..)
            .map(|i| offset + i as f64 * step)
            .take_while(|&a| a < 360.)
            .map(|a| (quality, a))
            .collect();
        rotation(&samples)
    }

    #[test]
    fn test_best_quality_wins_each_bin() {
        let mut merger = RotationMerger::new(&SessionConfig::default());
        merger.add(&rotation(&[(10, 0.5), (10, 10.2)]));
        merger.add(&rotation(&[(30, 1.5), (5, 10.8), (10, 20.)]));

        let merged = merger.rotation();
        assert_eq!(merged.rejected, 2);
        let samples: Vec<(u8, f64)> = merged
            .accepted
            .iter()
            .map(|s| (s.quality, s.angle_deg))
            .collect();
        assert_eq!(samples, vec![(30, 1.5), (10, 10.2), (10, 20.)]);
    }

    #[test]
    fn test_interleaved_sparse_sweeps_reach_coverage() {
        let mut merger = RotationMerger::new(&SessionConfig::default());
        let coverage = merger.add(&spaced(4., 0., 10));
        assert!((coverage.coverage - 0.5).abs() < 1e-12);
        assert_eq!(merger.outcome(), None);

        let coverage = merger.add(&spaced(4., 2., 10));
        assert_eq!(coverage.coverage, 1.0);
        assert_eq!(merger.outcome(), Some(MergeOutcome::CoverageMet));
        assert_eq!(merger.rotations(), 2);
        assert_eq!(merger.rotation().accepted.len(), 180);
    }

    #[test]
    fn test_stalled_coverage_is_a_plateau() {
        let mut merger = RotationMerger::new(&SessionConfig::default());
        // the first sweep counts as progress, the next five do not
        for _ in 0..5 {
            merger.add(&spaced(4., 0., 10));
            assert_eq!(merger.outcome(), None);
        }
        merger.add(&spaced(4., 0., 10));
        assert_eq!(merger.outcome(), Some(MergeOutcome::Plateau));
    }

    #[test]
    fn test_rotation_limit() {
        let config = SessionConfig {
            max_merged_rotations: 2,
            ..Default::default()
        };
        let mut merger = RotationMerger::new(&config);
        merger.add(&spaced(8., 0., 10));
        assert_eq!(merger.outcome(), None);
        merger.add(&spaced(8., 4., 10));
        assert_eq!(merger.outcome(), Some(MergeOutcome::RotationLimit));
    }

    #[test]
    fn test_no_return_samples_are_ignored() {
        let mut merger = RotationMerger::new(&SessionConfig::default());
        merger.add(&Rotation {
            accepted: vec![RawSample::new(10, 5., 0.), RawSample::new(10, 7., 900.)],
            rejected: 0,
        });
        assert_eq!(merger.rotation().accepted.len(), 1);
        assert!(!merger.is_empty());
    }
}
