use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of one scan session.
///
/// `Idle -> Running -> {Succeeded, Failed, Cancelled}`; the last three are
/// terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Failed | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Succeeded => "succeeded",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Acquisition progress within the rotation currently being assembled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Progress {
    pub samples_seen: usize,
    pub samples_accepted: usize,
    /// Expected samples in one full sweep.
    pub estimated_total: usize,
    /// Sealed rotations discarded for having too few usable samples.
    pub rotations_rejected: u32,
}

impl Progress {
    /// Fraction of the expected sweep seen so far, clamped to `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.estimated_total == 0 {
            return 0.0;
        }
        (self.samples_seen as f64 / self.estimated_total as f64).min(1.0)
    }
}

/// Destination of the two encoded scan files.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub ply: PathBuf,
}

impl OutputPaths {
    pub fn new(csv: impl Into<PathBuf>, ply: impl Into<PathBuf>) -> OutputPaths {
        OutputPaths {
            csv: csv.into(),
            ply: ply.into(),
        }
    }

    /// `scan.csv` and `scan.ply` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> OutputPaths {
        let dir = dir.as_ref();
        OutputPaths::new(dir.join("scan.csv"), dir.join("scan.ply"))
    }
}

/// Broad cause of a failed session, used to phrase user-visible reasons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureKind {
    /// The sensor is missing, silent or talking garbage.
    Connectivity,
    /// The port exists but cannot be used: permissions, another owner, or
    /// several candidates to choose from.
    PortAccess,
    /// Samples arrived but too few were usable.
    DataQuality,
    /// Output files could not be written.
    Storage,
    Timeout,
    Configuration,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            FailureKind::Connectivity => "hardware connectivity",
            FailureKind::PortAccess => "port access",
            FailureKind::DataQuality => "data quality",
            FailureKind::Storage => "storage",
            FailureKind::Timeout => "timeout",
            FailureKind::Configuration => "configuration",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(SessionState::Succeeded.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }

    #[test]
    fn test_progress_fraction() {
        let progress = Progress {
            samples_seen: 90,
            samples_accepted: 80,
            estimated_total: 360,
            rotations_rejected: 0,
        };
        assert!((progress.fraction() - 0.25).abs() < 1e-12);
        assert_eq!(Progress::default().fraction(), 0.0);
    }

    #[test]
    fn test_output_paths_in_dir() {
        let paths = OutputPaths::in_dir("data");
        assert_eq!(paths.csv, Path::new("data/scan.csv"));
        assert_eq!(paths.ply, Path::new("data/scan.ply"));
    }
}
