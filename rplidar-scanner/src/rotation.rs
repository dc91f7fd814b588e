use crate::config::AssemblerConfig;
use crate::error::{Result, ScanError};
use rplidar_data::{RawSample, Rotation};
use std::mem;

/// Folds a sample stream into complete sweeps.
///
/// A sweep is sealed when a sample's angle drops below the previous one by
/// more than the wrap hysteresis. That sample opens the next sweep. Samples
/// below the quality threshold or without a return are counted but not
/// accepted.
#[derive(Clone, Debug)]
pub struct RotationAssembler {
    config: AssemblerConfig,
    previous_angle: Option<f64>,
    accepted: Vec<RawSample>,
    rejected: usize,
}

impl RotationAssembler {
    pub fn new(config: AssemblerConfig) -> RotationAssembler {
        RotationAssembler {
            config,
            previous_angle: None,
            accepted: Vec::new(),
            rejected: 0,
        }
    }

    /// Adds one sample. Returns the sealed sweep when this sample wrapped
    /// around, as `PartialRotation` if it has too few accepted samples.
    pub fn push(&mut self, sample: RawSample) -> Option<Result<Rotation>> {
        let wrapped = matches!(
            self.previous_angle,
            Some(previous) if sample.angle_deg < previous - self.config.wrap_hysteresis_deg
        );
        let sealed = wrapped.then(|| self.seal());

        self.previous_angle = Some(sample.angle_deg);
        if self.accepts(&sample) {
            self.accepted.push(sample);
        } else {
            self.rejected += 1;
        }
        sealed
    }

    pub fn accepts(&self, sample: &RawSample) -> bool {
        sample.quality >= self.config.min_quality && sample.has_return()
    }

    /// Samples in the sweep being assembled.
    pub fn pending_seen(&self) -> usize {
        self.accepted.len() + self.rejected
    }

    pub fn pending_accepted(&self) -> usize {
        self.accepted.len()
    }

    fn seal(&mut self) -> Result<Rotation> {
        let rotation = Rotation {
            accepted: mem::take(&mut self.accepted),
            rejected: mem::take(&mut self.rejected),
        };
        if rotation.accepted_count() < self.config.min_accepted_samples {
            return Err(ScanError::PartialRotation {
                accepted: rotation.accepted_count(),
                required: self.config.min_accepted_samples,
            });
        }
        Ok(rotation)
    }
}

/// Lazy sequence of sealed sweeps over a sample iterator.
///
/// Ends when the samples do; a sweep still open at that point is dropped.
pub struct Rotations<I> {
    samples: I,
    assembler: RotationAssembler,
}

impl<I: Iterator<Item = RawSample>> Iterator for Rotations<I> {
    type Item = Result<Rotation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sample = self.samples.next()?;
            if let Some(sealed) = self.assembler.push(sample) {
                return Some(sealed);
            }
        }
    }
}

pub fn rotations<I>(samples: I, config: AssemblerConfig) -> Rotations<I::IntoIter>
where
    I: IntoIterator<Item = RawSample>,
{
    Rotations {
        samples: samples.into_iter(),
        assembler: RotationAssembler::new(config),
    }
}
