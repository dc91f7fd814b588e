//! Supervised scan sessions.
//!
//! Each session runs the whole pipeline on its own worker thread: resolve
//! the port, open the sensor, assemble one good sweep, convert it and write
//! the files. The caller keeps a handle (the session id) to watch, cancel or
//! wait for it, and releases it once done.

use crate::backend::{SerialBackend, SystemBackend};
use crate::config::ScanConfig;
use crate::coverage::Coverage;
use crate::error::{Result, ScanError};
use crate::event::{session_topic, ScanEvent, ALL_SESSIONS_TOPIC};
use crate::merge::RotationMerger;
use crate::port::{PortLease, PortLeases, PortResolver};
use crate::retry::RetryBudget;
use crate::rotation::RotationAssembler;
use crate::source::SourceGuard;
use crate::status::{StatusChannel, Subscription};
use crate::transform::PointTransformer;
use crate::writer::{read_csv, FileWriter};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rplidar_data::{FailureKind, OutputPaths, PointCloud, Progress, Rotation, SessionState};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Parameters of one scan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanRequest {
    /// Port to use instead of discovering one.
    pub port: Option<String>,
    /// Tilt of the scan plane in degrees.
    pub tilt_deg: f64,
    /// Overrides the configured session time limit.
    pub timeout: Option<Duration>,
    /// Overrides the configured output files.
    pub outputs: Option<OutputPaths>,
    /// Adds the sweep to the points already in the output CSV instead of
    /// replacing them, building one cloud from sweeps at several tilts.
    pub accumulate: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionError {
    pub kind: FailureKind,
    pub message: String,
}

/// Snapshot of one session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanSession {
    pub session_id: Uuid,
    /// Resolved port, once known.
    pub port: Option<String>,
    pub start_time: DateTime<Utc>,
    pub outputs: OutputPaths,
    pub state: SessionState,
    pub progress: Progress,
    pub error: Option<SessionError>,
    /// Human-readable reason of a failed or cancelled session.
    pub reason: Option<String>,
}

struct SessionEntry {
    session: ScanSession,
    terminator_tx: Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

type Sessions = Arc<Mutex<HashMap<Uuid, SessionEntry>>>;

pub struct ScanController {
    config: ScanConfig,
    backend: Arc<dyn SerialBackend>,
    channel: StatusChannel<ScanEvent>,
    sessions: Sessions,
    leases: PortLeases,
}

impl ScanController {
    pub fn new(config: ScanConfig, backend: Arc<dyn SerialBackend>) -> ScanController {
        ScanController {
            config,
            backend,
            channel: StatusChannel::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            leases: PortLeases::new(),
        }
    }

    /// Controller driving the serial ports of this machine.
    pub fn with_system_backend(config: ScanConfig) -> ScanController {
        ScanController::new(config, Arc::new(SystemBackend))
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn channel(&self) -> &StatusChannel<ScanEvent> {
        &self.channel
    }

    /// Starts a new session in the background and returns its id.
    pub fn start(&self, request: ScanRequest) -> Result<Uuid> {
        self.config.validate()?;
        if !request.tilt_deg.is_finite() {
            return Err(ScanError::InvalidConfig(format!(
                "tilt must be a finite angle, got {}",
                request.tilt_deg
            )));
        }
        if request.timeout == Some(Duration::ZERO) {
            return Err(ScanError::InvalidConfig(
                "session timeout must be positive".to_string(),
            ));
        }

        let session_id = Uuid::new_v4();
        let outputs = request
            .outputs
            .clone()
            .unwrap_or_else(|| self.config.output.paths());
        let session = ScanSession {
            session_id,
            port: request.port.clone(),
            start_time: Utc::now(),
            outputs: outputs.clone(),
            state: SessionState::Running,
            progress: Progress {
                estimated_total: self.config.session.expected_samples_per_rotation,
                ..Default::default()
            },
            error: None,
            reason: None,
        };
        let start_time = session.start_time;

        let (terminator_tx, terminator_rx) = bounded(1);
        self.sessions.lock().insert(
            session_id,
            SessionEntry {
                session,
                terminator_tx,
                worker: None,
            },
        );

        let worker = ScanWorker {
            session_id,
            start_time,
            port: request.port,
            tilt_deg: request.tilt_deg,
            accumulate: request.accumulate,
            timeout: request.timeout.unwrap_or_else(|| self.config.session.timeout()),
            outputs,
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            channel: self.channel.clone(),
            sessions: Arc::clone(&self.sessions),
            leases: self.leases.clone(),
            cancel: CancelToken::new(terminator_rx),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("scan-{}", &session_id.simple().to_string()[..8]))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                if let Some(entry) = self.sessions.lock().get_mut(&session_id) {
                    entry.worker = Some(handle);
                }
                info!("Scan session {} started", session_id);
                Ok(session_id)
            }
            Err(e) => {
                self.sessions.lock().remove(&session_id);
                Err(ScanError::Spawn(e))
            }
        }
    }

    /// Asks the session to stop. It unwinds at its next read boundary.
    pub fn cancel(&self, session_id: Uuid) -> Result<()> {
        let sessions = self.sessions.lock();
        let entry = sessions
            .get(&session_id)
            .ok_or(ScanError::UnknownSession(session_id))?;
        if !entry.session.state.is_terminal() {
            debug!("Cancelling scan session {}", session_id);
            // a full queue already holds a cancel request
            let _ = entry.terminator_tx.try_send(true);
        }
        Ok(())
    }

    pub fn status(&self, session_id: Uuid) -> Result<ScanSession> {
        self.sessions
            .lock()
            .get(&session_id)
            .map(|entry| entry.session.clone())
            .ok_or(ScanError::UnknownSession(session_id))
    }

    /// Every session started by this controller, oldest first.
    pub fn sessions(&self) -> Vec<ScanSession> {
        let mut sessions: Vec<ScanSession> = self
            .sessions
            .lock()
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    /// Live events of one session.
    pub fn subscribe(&self, session_id: Uuid) -> Result<Subscription<ScanEvent>> {
        if !self.sessions.lock().contains_key(&session_id) {
            return Err(ScanError::UnknownSession(session_id));
        }
        Ok(self.channel.subscribe(&session_topic(session_id)))
    }

    /// Live events of every session.
    pub fn subscribe_all(&self) -> Subscription<ScanEvent> {
        self.channel.subscribe(ALL_SESSIONS_TOPIC)
    }

    /// Blocks until the session's worker has finished.
    pub fn wait(&self, session_id: Uuid) -> Result<ScanSession> {
        let worker = self
            .sessions
            .lock()
            .get_mut(&session_id)
            .ok_or(ScanError::UnknownSession(session_id))?
            .worker
            .take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                error!("Scan worker of session {} panicked", session_id);
            }
        }
        self.status(session_id)
    }

    /// Forgets a session: cancels it if still running, waits for its worker
    /// and drops its entry, topic and cached events. Returns its final state.
    pub fn release(&self, session_id: Uuid) -> Result<ScanSession> {
        self.cancel(session_id)?;
        let session = self.wait(session_id)?;
        self.sessions.lock().remove(&session_id);
        self.channel.remove(&session_topic(session_id));
        self.channel
            .clear_last_if(ALL_SESSIONS_TOPIC, |last| last.session_id() == session_id);
        debug!("Released scan session {}", session_id);
        Ok(session)
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        let workers: Vec<JoinHandle<()>> = self
            .sessions
            .lock()
            .values_mut()
            .filter_map(|entry| {
                let _ = entry.terminator_tx.try_send(true);
                entry.worker.take()
            })
            .collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Scan worker panicked");
            }
        }
    }
}

fn do_terminate(terminator_rx: &Receiver<bool>) -> bool {
    match terminator_rx.try_recv() {
        Ok(terminate) => terminate,
        Err(TryRecvError::Empty) => false,
        Err(TryRecvError::Disconnected) => true,
    }
}

/// Cancellation request as seen by a worker. Once observed it stays set.
struct CancelToken {
    terminator_rx: Receiver<bool>,
    cancelled: bool,
}

impl CancelToken {
    fn new(terminator_rx: Receiver<bool>) -> CancelToken {
        CancelToken {
            terminator_rx,
            cancelled: false,
        }
    }

    fn is_cancelled(&mut self) -> bool {
        if !self.cancelled {
            self.cancelled = do_terminate(&self.terminator_rx);
        }
        self.cancelled
    }

    fn check(&mut self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }
}

struct ScanWorker {
    session_id: Uuid,
    start_time: DateTime<Utc>,
    port: Option<String>,
    tilt_deg: f64,
    accumulate: bool,
    timeout: Duration,
    outputs: OutputPaths,
    config: ScanConfig,
    backend: Arc<dyn SerialBackend>,
    channel: StatusChannel<ScanEvent>,
    sessions: Sessions,
    leases: PortLeases,
    cancel: CancelToken,
}

impl ScanWorker {
    fn run(mut self) {
        let result = self.acquire();
        self.finish(result);
    }

    fn acquire(&mut self) -> Result<(PointCloud, Coverage)> {
        let deadline = Instant::now() + self.timeout;
        self.cancel.check()?;

        let (port_name, _lease) = self.claim_port()?;
        self.update(|session| session.port = Some(port_name.clone()));
        self.publish(ScanEvent::Started {
            session_id: self.session_id,
            port: port_name.clone(),
            start_time: self.start_time,
        });
        self.cancel.check()?;

        let mut source = SourceGuard::new(self.backend.open(&port_name, &self.config.sensor)?);
        let rotation = self.next_rotation(&mut source, deadline)?;
        if let Err(e) = source.close() {
            warn!("Failed to close {}: {}", port_name, e);
        }

        let mut cloud = PointTransformer::new(self.tilt_deg).cloud(&rotation)?;
        let coverage = Coverage::of(&cloud);
        if !coverage.is_acceptable(self.config.session.min_coverage, self.config.session.max_gap_deg)
        {
            warn!(
                "Sparse sweep: coverage {:.1}%, largest gap {:.1} deg, {} points",
                coverage.coverage * 100.,
                coverage.max_gap_deg,
                coverage.points
            );
        }

        if self.accumulate {
            cloud = self.with_previous_sweeps(cloud)?;
        }

        let staged = FileWriter::new(self.config.output.extended_ply).stage(&cloud, &self.outputs)?;
        self.cancel.check()?;
        staged.commit()?;
        Ok((cloud, coverage))
    }

    /// An explicit port is leased before it is probed; a discovered one
    /// right after discovery.
    fn claim_port(&self) -> Result<(String, PortLease)> {
        let resolver = PortResolver::new(&self.config.ports);
        match self.port.as_deref() {
            Some(explicit) => {
                let lease = self.leases.claim(explicit)?;
                let port_name = resolver.resolve(self.backend.as_ref(), Some(explicit))?;
                Ok((port_name, lease))
            }
            None => {
                let port_name = resolver.resolve(self.backend.as_ref(), None)?;
                let lease = self.leases.claim(&port_name)?;
                Ok((port_name, lease))
            }
        }
    }

    /// Puts the points already saved to the session's CSV in front of `cloud`.
    fn with_previous_sweeps(&self, cloud: PointCloud) -> Result<PointCloud> {
        let path = &self.outputs.csv;
        if !path.exists() {
            return Ok(cloud);
        }
        let points = read_csv(path).map_err(|e| ScanError::ReadFailure {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let mut combined = PointCloud::new(points);
        info!(
            "Adding {} points at tilt {} deg to the {} in {}",
            cloud.len(),
            self.tilt_deg,
            combined.len(),
            path.display()
        );
        combined.extend(cloud);
        Ok(combined)
    }

    /// The first usable sweep after warm-up, or with merging enabled the
    /// merge of usable sweeps once it needs no more.
    fn next_rotation(&mut self, source: &mut SourceGuard, deadline: Instant) -> Result<Rotation> {
        let session = &self.config.session;
        let mut assembler = RotationAssembler::new(self.config.rotation.clone());
        let mut warmup = session.warmup_rotations;
        let mut partials = RetryBudget::new(session.partial_rotation_retries);
        let progress_interval = session.progress_interval;
        let mut progress = Progress {
            estimated_total: session.expected_samples_per_rotation,
            ..Default::default()
        };
        let mut since_report = 0;
        let mut merger = session
            .merge_until_coverage
            .then(|| RotationMerger::new(session));

        loop {
            self.cancel.check()?;
            if Instant::now() >= deadline {
                if let Some(merger) = merger.as_ref().filter(|m| !m.is_empty()) {
                    warn!(
                        "Session {} ran out of time, keeping the merge of {} sweeps",
                        self.session_id,
                        merger.rotations()
                    );
                    return Ok(merger.rotation());
                }
                return Err(ScanError::SessionTimeout(self.timeout));
            }

            let sample = match source.read() {
                Ok(sample) => sample,
                Err(e) if e.is_transient() => {
                    debug!("Session {}: {}", self.session_id, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let seen_before = assembler.pending_seen();
            let sealed = assembler.push(sample);
            progress.samples_seen = assembler.pending_seen();
            progress.samples_accepted = assembler.pending_accepted();

            if let Some(sealed) = sealed {
                progress.estimated_total = seen_before.max(1);
                if warmup > 0 {
                    warmup -= 1;
                    debug!("Skipped warm-up sweep of {} samples", seen_before);
                    continue;
                }
                match sealed {
                    Ok(rotation) => {
                        self.update(|s| s.progress = progress);
                        let Some(merger) = merger.as_mut() else {
                            return Ok(rotation);
                        };
                        partials.record_success();
                        let coverage = merger.add(&rotation);
                        self.publish(ScanEvent::RotationMerged {
                            session_id: self.session_id,
                            merged: merger.rotations(),
                            coverage,
                        });
                        if let Some(outcome) = merger.outcome() {
                            info!(
                                "Merged {} sweeps, {}: coverage {:.1}%, largest gap {:.1} deg",
                                merger.rotations(),
                                outcome,
                                coverage.coverage * 100.,
                                coverage.max_gap_deg
                            );
                            return Ok(merger.rotation());
                        }
                    }
                    Err(ScanError::PartialRotation { accepted, required }) => {
                        progress.rotations_rejected += 1;
                        self.update(|s| s.progress = progress);
                        if !partials.record_failure() {
                            return Err(ScanError::PartialRotation { accepted, required });
                        }
                        warn!(
                            "Sweep had {} usable samples, {} required; retrying",
                            accepted, required
                        );
                        self.publish(ScanEvent::RotationRejected {
                            session_id: self.session_id,
                            accepted,
                            required,
                            attempt: partials.failures(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }

            since_report += 1;
            if since_report >= progress_interval {
                since_report = 0;
                self.update(|s| s.progress = progress);
                self.publish(ScanEvent::Progress {
                    session_id: self.session_id,
                    progress,
                });
            }
        }
    }

    fn finish(&self, result: Result<(PointCloud, Coverage)>) {
        match result {
            Ok((cloud, coverage)) => {
                info!(
                    "Scan session {} wrote {} points to {} and {}",
                    self.session_id,
                    cloud.len(),
                    self.outputs.csv.display(),
                    self.outputs.ply.display()
                );
                self.update(|s| s.state = SessionState::Succeeded);
                self.publish(ScanEvent::Succeeded {
                    session_id: self.session_id,
                    outputs: self.outputs.clone(),
                    points: cloud.len(),
                    coverage,
                    cloud: Arc::new(cloud),
                });
            }
            Err(ScanError::Cancelled) => {
                let reason = "cancelled by request".to_string();
                info!("Scan session {} {}", self.session_id, reason);
                self.update(|s| {
                    s.state = SessionState::Cancelled;
                    s.reason = Some(reason.clone());
                });
                self.publish(ScanEvent::Cancelled {
                    session_id: self.session_id,
                    reason,
                });
            }
            Err(e) => {
                let kind = e.kind().unwrap_or(FailureKind::Configuration);
                let reason = e.reason();
                error!("Scan session {} failed. {}", self.session_id, reason);
                self.update(|s| {
                    s.state = SessionState::Failed;
                    s.error = Some(SessionError {
                        kind,
                        message: e.to_string(),
                    });
                    s.reason = Some(reason.clone());
                });
                self.publish(ScanEvent::Failed {
                    session_id: self.session_id,
                    kind,
                    reason,
                });
            }
        }
    }

    fn update<F: FnOnce(&mut ScanSession)>(&self, f: F) {
        if let Some(entry) = self.sessions.lock().get_mut(&self.session_id) {
            f(&mut entry.session);
        }
    }

    fn publish(&self, event: ScanEvent) {
        self.channel
            .publish(&session_topic(self.session_id), event.clone());
        self.channel.publish(ALL_SESSIONS_TOPIC, event);
    }
}
