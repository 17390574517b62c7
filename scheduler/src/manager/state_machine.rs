//! Slot state machine (spec 4.5.1). Pure functions the tick's `decide`
//! phase calls into; no I/O, no clock reads beyond what's passed in.

use chrono::{DateTime, Utc};
use scheduler_types::{SlotPhase, TaskState};
use std::time::Duration;

/// What an observed task status does to a slot currently in `phase`.
pub fn apply_status(phase: SlotPhase, state: TaskState) -> Option<SlotPhase> {
    match phase {
        SlotPhase::TryingToStart => {
            if state == TaskState::Running {
                Some(SlotPhase::Running)
            } else if state.is_terminal() {
                Some(SlotPhase::FailedOver)
            } else {
                None
            }
        }
        SlotPhase::Running => {
            if state.is_terminal() {
                Some(SlotPhase::FailedOver)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// What a slot stuck past its deadline in an intermediate phase should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Reservation/persistence lost; go back to NEW and re-drive.
    RetryFromNew,
    /// Start never completed; hand off to the restart controller.
    Escalate,
}

pub fn check_timeout(
    phase: SlotPhase,
    last_transition: DateTime<Utc>,
    now: DateTime<Utc>,
    deadline: Duration,
) -> Option<TimeoutOutcome> {
    if !phase.is_intermediate() {
        return None;
    }
    let elapsed = now.signed_duration_since(last_transition);
    if elapsed.to_std().map(|e| e < deadline).unwrap_or(false) {
        return None;
    }
    match phase {
        SlotPhase::TryingToReserve | SlotPhase::TryingToPersist => Some(TimeoutOutcome::RetryFromNew),
        SlotPhase::TryingToStart => Some(TimeoutOutcome::Escalate),
        _ => None,
    }
}
