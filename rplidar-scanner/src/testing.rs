//! In-memory serial backend for tests.

use crate::backend::SerialBackend;
use crate::config::SourceConfig;
use crate::error::{Result, ScanError};
use crate::port::PortCandidate;
use crate::serial::sleep_ms;
use crate::source::SampleSource;
use parking_lot::Mutex;
use rplidar_data::RawSample;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// `n` samples evenly spread from `start_deg` up to 360 degrees, 1 m away.
pub(crate) fn sweep(n: usize, start_deg: f64, quality: u8) -> Vec<RawSample> {
    let step = (360. - start_deg) / n as f64;
    (0..n)
        .map(|i| RawSample::new(quality, start_deg + step * i as f64, 1000.))
        .collect()
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    ports: Vec<PortCandidate>,
    scripts: Mutex<HashMap<String, Vec<RawSample>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub(crate) fn new() -> FakeBackend {
        FakeBackend::default()
    }

    pub(crate) fn with_port(mut self, candidate: PortCandidate) -> FakeBackend {
        self.ports.push(candidate);
        self
    }

    /// Samples the source on `port_name` plays back before going silent.
    pub(crate) fn with_script(self, port_name: &str, samples: Vec<RawSample>) -> FakeBackend {
        self.scripts.lock().insert(port_name.to_string(), samples);
        self
    }

    /// Number of sources closed so far.
    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SerialBackend for FakeBackend {
    fn enumerate(&self) -> Result<Vec<PortCandidate>> {
        Ok(self.ports.clone())
    }

    fn probe(&self, port_name: &str) -> Result<()> {
        if self.ports.iter().any(|p| p.device_name == port_name) {
            Ok(())
        } else {
            Err(ScanError::PortNotFound(port_name.to_string()))
        }
    }

    fn open(&self, port_name: &str, _config: &SourceConfig) -> Result<Box<dyn SampleSource>> {
        self.probe(port_name)?;
        let samples = self.scripts.lock().get(port_name).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedSource {
            samples: samples.into_iter(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// Plays back a fixed list of samples, then times out on every read.
struct ScriptedSource {
    samples: std::vec::IntoIter<RawSample>,
    closed: Arc<AtomicUsize>,
}

impl SampleSource for ScriptedSource {
    fn read(&mut self) -> Result<RawSample> {
        match self.samples.next() {
            Some(sample) => Ok(sample),
            None => {
                sleep_ms(2);
                Err(ScanError::IoTimeout(Duration::from_millis(2)))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
