//! Envelope lifecycle state machine
//!
//! `Pending -> InFlight -> {Acked(Success) | Acked(FailureReported) | Requeued}`,
//! with `Requeued -> Pending` once the redelivery delay elapses and
//! `InFlight -> Pending` when a visibility timeout expires.

pub mod envelope_state_machine;
pub mod errors;
pub mod events;
pub mod states;

pub use envelope_state_machine::{EnvelopeStateMachine, Transition};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::EnvelopeEvent;
pub use states::{AckOutcome, EnvelopeState};
