// Resource state machine for orchestrated entities
//
// Tasks and messages share one lifecycle: Queued -> Processing -> {Active | Error},
// optionally followed by Archived.

pub mod errors;
pub mod events;
pub mod resource_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ResourceEvent;
pub use resource_state_machine::{determine_target_state, Stateful};
pub use states::ResourceStatus;
