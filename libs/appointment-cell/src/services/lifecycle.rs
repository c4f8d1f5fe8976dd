use tracing::{debug, warn};

use shared_models::AppointmentStatus;

use crate::models::{AppointmentAction, AppointmentError, Transition};

/// The appointment transition table: (status, action) -> transition or error.
///
/// Cancelled and rejected appointments are deleted, so those two statuses
/// never appear as a stored current state and are never a `SetStatus` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn transition(
        &self,
        current: AppointmentStatus,
        action: AppointmentAction,
    ) -> Result<Transition, AppointmentError> {
        use AppointmentStatus::*;

        let next = match (current, action) {
            (Pending, AppointmentAction::Approve) => Some(Transition::To(Confirmed)),
            (Pending, AppointmentAction::Reject) => Some(Transition::Delete),
            (status, AppointmentAction::Cancel) if status.can_be_cancelled() => Some(Transition::Delete),
            (status, AppointmentAction::Reschedule) if status.can_be_rescheduled() => {
                Some(Transition::To(Confirmed))
            }
            (Scheduled | Confirmed | InProgress, AppointmentAction::SetStatus(target)) if target.is_persistable() => {
                Some(Transition::To(target))
            }
            _ => None,
        };

        match next {
            Some(transition) => {
                debug!("Transition {} -> {:?} via {}", current, transition, action);
                Ok(transition)
            }
            None => {
                warn!("Rejected transition: cannot {} from {}", action, current);
                Err(AppointmentError::InvalidTransition { status: current, action })
            }
        }
    }

    /// Statuses staff may set directly from `current`.
    pub fn valid_status_targets(&self, current: AppointmentStatus) -> Vec<AppointmentStatus> {
        AppointmentStatus::ALL
            .into_iter()
            .filter(|target| {
                matches!(
                    self.transition(current, AppointmentAction::SetStatus(*target)),
                    Ok(Transition::To(_))
                )
            })
            .collect()
    }
}
