use super::errors::{StateMachineError, StateMachineResult};
use super::events::ResourceEvent;
use super::states::ResourceStatus;

/// Determine the target status for an event, rejecting every transition that
/// is not part of `Queued -> Processing -> {Active | Error} -> Archived`.
pub fn determine_target_state(
    entity: &'static str,
    current: ResourceStatus,
    event: &ResourceEvent,
) -> StateMachineResult<ResourceStatus> {
    let target = match (current, event) {
        (ResourceStatus::Queued, ResourceEvent::Start) => ResourceStatus::Processing,
        (ResourceStatus::Processing, ResourceEvent::Complete) => ResourceStatus::Active,
        (ResourceStatus::Processing, ResourceEvent::Fail(_)) => ResourceStatus::Error,
        (ResourceStatus::Active, ResourceEvent::Archive) => ResourceStatus::Archived,
        (ResourceStatus::Error, ResourceEvent::Archive) => ResourceStatus::Archived,
        (from, event) => {
            return Err(StateMachineError::invalid_transition(entity, from, event));
        }
    };

    Ok(target)
}

/// Anything that carries a status and can be driven through the state machine
pub trait Stateful {
    /// Entity name used in transition errors
    const ENTITY: &'static str;

    fn status(&self) -> ResourceStatus;

    fn set_status(&mut self, status: ResourceStatus);

    /// Apply an event, updating the status in place
    fn apply(&mut self, event: &ResourceEvent) -> StateMachineResult<ResourceStatus> {
        let target = determine_target_state(Self::ENTITY, self.status(), event)?;
        self.set_status(target);
        Ok(target)
    }

    /// Drive a pending entity to `Error`, passing through `Processing` when it
    /// was still `Queued`. Settled entities are left untouched.
    fn fail_pending(&mut self, reason: &str) -> StateMachineResult<bool> {
        if self.status() == ResourceStatus::Queued {
            self.apply(&ResourceEvent::Start)?;
        }
        if self.status() == ResourceStatus::Processing {
            self.apply(&ResourceEvent::fail_with_error(reason))?;
            return Ok(true);
        }
        Ok(false)
    }
}
