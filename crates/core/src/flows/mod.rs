pub mod engine;
pub mod states;

pub use engine::StatusMachine;
pub use states::{TransitionGuard, TransitionOutcome, TransitionRule, TransitionTrigger};
