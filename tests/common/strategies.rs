//! Proptest strategies for lifecycle events

use proptest::prelude::*;

use completion_core::state_machine::{ResourceEvent, ResourceStatus};

pub fn event_strategy() -> impl Strategy<Value = ResourceEvent> {
    prop_oneof![
        Just(ResourceEvent::Start),
        Just(ResourceEvent::Complete),
        "[a-z ]{0,16}".prop_map(ResourceEvent::Fail),
        Just(ResourceEvent::Archive),
    ]
}

pub fn status_strategy() -> impl Strategy<Value = ResourceStatus> {
    prop_oneof![
        Just(ResourceStatus::Active),
        Just(ResourceStatus::Archived),
        Just(ResourceStatus::Queued),
        Just(ResourceStatus::Processing),
        Just(ResourceStatus::Error),
    ]
}
