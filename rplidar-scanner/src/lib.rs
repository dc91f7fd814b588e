//! Single-sweep point cloud capture from an RPLidar A-series sensor.
//!
//! ```no_run
//! use rplidar_scanner::{ScanConfig, ScanController, ScanRequest};
//!
//! let controller = ScanController::with_system_backend(ScanConfig::default());
//! let id = controller.start(ScanRequest::default())?;
//! for event in controller.subscribe(id)? {
//!     println!("{:?}", event);
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok::<(), rplidar_scanner::ScanError>(())
//! ```

mod backend;
mod config;
mod constants;
mod controller;
mod coverage;
mod error;
mod event;
mod merge;
mod numeric;
mod packet;
mod port;
mod retry;
mod rotation;
mod serial;
mod source;
mod status;
#[cfg(test)]
mod testing;
mod transform;
mod writer;

pub use crate::backend::{SerialBackend, SystemBackend};
pub use crate::config::{
    AssemblerConfig, OutputConfig, PortConfig, ScanConfig, SessionConfig, SourceConfig,
    UsbSignature,
};
pub use crate::constants::{CP210X_PID, CP210X_VID};
pub use crate::controller::{ScanController, ScanRequest, ScanSession, SessionError};
pub use crate::coverage::Coverage;
pub use crate::error::{Result, ScanError};
pub use crate::event::{session_topic, ScanEvent, ALL_SESSIONS_TOPIC};
pub use crate::merge::{MergeOutcome, RotationMerger};
pub use crate::port::{
    list_ports, MatchStrength, Platform, PortCandidate, PortLease, PortLeases, PortListing,
    PortResolver,
};
pub use crate::retry::RetryBudget;
pub use crate::rotation::{rotations, RotationAssembler, Rotations};
pub use crate::source::{query_device, RplidarSource, SampleSource, SourceGuard};
pub use crate::status::{
    StatusChannel, Subscription, SubscriptionIter, DEFAULT_QUEUE_CAPACITY,
};
pub use crate::transform::{transform, PointTransformer};
pub use crate::writer::{
    read_csv, read_ply, FileWriter, StagedOutput, CSV_HEADER, CSV_TILT_COLUMN,
};
pub use rplidar_data;
