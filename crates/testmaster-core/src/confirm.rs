//! Two-step confirmation for destructive actions.
//!
//! ```text
//! Idle --arm(target)--> AwaitingConfirmation { target, armed_at }
//! AwaitingConfirmation --confirm(target) within window--> Idle (action runs)
//! AwaitingConfirmation --cancel / window elapsed--> Idle
//! ```
//!
//! Time is passed in by the caller so the machine is deterministic.

use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::records::RecordKind;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// A record slated for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeleteTarget {
    pub kind: RecordKind,
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmState<T> {
    Idle,
    AwaitingConfirmation { target: T, armed_at: Instant },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmError {
    #[error("nothing is awaiting confirmation")]
    NotArmed,
    #[error("confirmation does not match the pending action")]
    TargetMismatch,
    #[error("confirmation window elapsed")]
    Expired,
}

#[derive(Debug, Clone)]
pub struct DeleteConfirmation<T = DeleteTarget> {
    state: ConfirmState<T>,
    window: Duration,
}

impl<T: Clone + PartialEq> DeleteConfirmation<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            state: ConfirmState::Idle,
            window,
        }
    }

    pub fn state(&self) -> &ConfirmState<T> {
        &self.state
    }

    /// Start (or restart) waiting for confirmation of `target`.
    pub fn arm(&mut self, target: T, now: Instant) {
        self.state = ConfirmState::AwaitingConfirmation {
            target,
            armed_at: now,
        };
    }

    /// The armed target, if the window is still open.
    pub fn pending(&self, now: Instant) -> Option<&T> {
        match &self.state {
            ConfirmState::AwaitingConfirmation { target, armed_at }
                if now.saturating_duration_since(*armed_at) <= self.window =>
            {
                Some(target)
            }
            _ => None,
        }
    }

    /// Consume the armed target. Any outcome other than a mismatch returns
    /// the machine to `Idle`.
    pub fn confirm(&mut self, target: &T, now: Instant) -> Result<T, ConfirmError> {
        let ConfirmState::AwaitingConfirmation {
            target: armed,
            armed_at,
        } = &self.state
        else {
            return Err(ConfirmError::NotArmed);
        };
        if now.saturating_duration_since(*armed_at) > self.window {
            self.state = ConfirmState::Idle;
            return Err(ConfirmError::Expired);
        }
        if armed != target {
            return Err(ConfirmError::TargetMismatch);
        }
        let confirmed = armed.clone();
        self.state = ConfirmState::Idle;
        Ok(confirmed)
    }

    pub fn cancel(&mut self) {
        self.state = ConfirmState::Idle;
    }
}

impl<T: Clone + PartialEq> Default for DeleteConfirmation<T> {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
