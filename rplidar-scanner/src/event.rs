use crate::coverage::Coverage;
use chrono::{DateTime, Utc};
use rplidar_data::{FailureKind, OutputPaths, PointCloud, Progress};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Topic carrying the events of every session.
pub const ALL_SESSIONS_TOPIC: &str = "scan/status";

/// Topic carrying the events of one session.
pub fn session_topic(session_id: Uuid) -> String {
    format!("{}/{}", ALL_SESSIONS_TOPIC, session_id)
}

/// Lifecycle and progress of a scan session, as published on the status channel.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        session_id: Uuid,
        port: String,
        start_time: DateTime<Utc>,
    },
    Progress {
        session_id: Uuid,
        progress: Progress,
    },
    /// A sealed sweep had too few usable samples and another is being tried.
    RotationRejected {
        session_id: Uuid,
        accepted: usize,
        required: usize,
        attempt: u32,
    },
    /// Another sweep went into the merge; `coverage` is that of the merge.
    RotationMerged {
        session_id: Uuid,
        merged: u32,
        coverage: Coverage,
    },
    /// `points` counts the whole written cloud, `coverage` describes the
    /// sweep captured by this session.
    Succeeded {
        session_id: Uuid,
        outputs: OutputPaths,
        points: usize,
        coverage: Coverage,
        #[serde(skip)]
        cloud: Arc<PointCloud>,
    },
    Failed {
        session_id: Uuid,
        kind: FailureKind,
        reason: String,
    },
    Cancelled {
        session_id: Uuid,
        reason: String,
    },
}

impl ScanEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            ScanEvent::Started { session_id, .. }
            | ScanEvent::Progress { session_id, .. }
            | ScanEvent::RotationRejected { session_id, .. }
            | ScanEvent::RotationMerged { session_id, .. }
            | ScanEvent::Succeeded { session_id, .. }
            | ScanEvent::Failed { session_id, .. }
            | ScanEvent::Cancelled { session_id, .. } => *session_id,
        }
    }

    /// Whether the session ends with this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Succeeded { .. } | ScanEvent::Failed { .. } | ScanEvent::Cancelled { .. }
        )
    }
}
