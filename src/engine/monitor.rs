use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Browser-side integrity violations the client reports. Any of them voids
/// the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegritySignal {
    VisibilityHidden,
    FocusLost,
    CopyAttempt,
    ContextMenu,
}

impl IntegritySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisibilityHidden => "visibility_hidden",
            Self::FocusLost => "focus_lost",
            Self::CopyAttempt => "copy_attempt",
            Self::ContextMenu => "context_menu",
        }
    }

    /// Human-readable annulment reason stored on the attempt.
    pub fn description(&self) -> &'static str {
        match self {
            Self::VisibilityHidden => "The exam tab was hidden or switched away from",
            Self::FocusLost => "The exam window lost focus",
            Self::CopyAttempt => "Exam content was copied to the clipboard",
            Self::ContextMenu => "The context menu was opened during the exam",
        }
    }
}

/// Arms on session start, trips at most once. Further signals after the trip,
/// or after disarm, are swallowed.
pub struct IntegrityMonitor {
    armed: AtomicBool,
}

impl IntegrityMonitor {
    pub fn new() -> Self {
        Self { armed: AtomicBool::new(true) }
    }

    /// Returns true only for the first signal while armed.
    pub fn trip(&self) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl Default for IntegrityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
