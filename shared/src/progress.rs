//! OTA progress tracking
//!
//! Holds the per-attempt download counters and the throttle that turns raw
//! byte counts into quantized progress reports, plus the phase machine an
//! update moves through.

use crate::limits::{PROGRESS_STEP, PROGRESS_UNREPORTED};

/// A progress report the download has earned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStep {
    /// A threshold below 100 was crossed
    Progress(u8),
    /// The download reached 100%
    Completed,
}

impl ProgressStep {
    pub fn percent(&self) -> u8 {
        match self {
            ProgressStep::Progress(p) => *p,
            ProgressStep::Completed => 100,
        }
    }
}

/// Counters for one OTA attempt
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    action_id: String,
    /// Image size learned while probing, 0 when unknown
    total_bytes: u64,
    downloaded_bytes: u64,
    /// Highest threshold already reported
    last_reported_percent: i32,
}

impl ProgressTracker {
    pub fn new(action_id: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            action_id: action_id.into(),
            total_bytes,
            downloaded_bytes: 0,
            last_reported_percent: PROGRESS_UNREPORTED,
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn last_reported_percent(&self) -> i32 {
        self.last_reported_percent
    }

    /// Current download percentage, clamped to [0, 100]
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let pct = self.downloaded_bytes.saturating_mul(100) / self.total_bytes;
        pct.min(100) as u8
    }

    /// Whether every advertised byte has arrived
    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.downloaded_bytes >= self.total_bytes
    }

    /// Account for a received chunk and return the thresholds it crossed.
    ///
    /// Each multiple of [`PROGRESS_STEP`] above zero is returned at most once
    /// over the life of the tracker, in increasing order. A single large chunk
    /// may cross several thresholds.
    pub fn record_chunk(&mut self, len: usize) -> Vec<ProgressStep> {
        self.downloaded_bytes = self.downloaded_bytes.saturating_add(len as u64);

        if self.total_bytes == 0 {
            return Vec::new();
        }

        let percent = i32::from(self.percent());
        let mut steps = Vec::new();
        let mut next = self.last_reported_percent + PROGRESS_STEP;

        while next <= percent {
            // 0% carries no information and is consumed silently
            if next == 100 {
                steps.push(ProgressStep::Completed);
            } else if next > 0 {
                steps.push(ProgressStep::Progress(next as u8));
            }
            self.last_reported_percent = next;
            next += PROGRESS_STEP;
        }

        steps
    }
}

/// Phases of an OTA update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Idle,
    /// Learning the image size
    Probing,
    /// Streaming the image into the update slot
    Downloading,
    /// Record persisted, waiting for the restart
    Restarting,
    /// Booted, checking for a pending record
    Verifying,
    Committed,
    Failed,
}

/// Events that move an update between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaEventKind {
    Accepted,
    SizeKnown,
    ImageCommitted,
    Booted,
    Confirmed,
    Error,
}

impl OtaPhase {
    /// Apply an event, returning the next phase or `None` if the event is
    /// not valid in this phase
    pub fn next(self, event: OtaEventKind) -> Option<OtaPhase> {
        use OtaEventKind::*;
        use OtaPhase::*;

        match (self, event) {
            // a finished attempt, good or bad, can be followed by a new one
            (Idle, Accepted) | (Committed, Accepted) | (Failed, Accepted) => Some(Probing),
            (Probing, SizeKnown) => Some(Downloading),
            (Downloading, ImageCommitted) => Some(Restarting),
            (Restarting, Booted) | (Idle, Booted) => Some(Verifying),
            (Verifying, Confirmed) => Some(Committed),
            (Probing, Error) | (Downloading, Error) | (Restarting, Error) | (Verifying, Error) => {
                Some(Failed)
            }
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OtaPhase::Committed | OtaPhase::Failed)
    }
}
