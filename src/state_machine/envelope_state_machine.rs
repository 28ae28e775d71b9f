use super::{
    errors::{StateMachineError, StateMachineResult},
    events::EnvelopeEvent,
    states::{AckOutcome, EnvelopeState},
};
use chrono::{DateTime, Utc};
use tracing::trace;
use uuid::Uuid;

/// One recorded state change
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: EnvelopeState,
    pub to: EnvelopeState,
    pub event: &'static str,
    pub at: DateTime<Utc>,
}

/// In-process lifecycle tracker for a single envelope delivery
#[derive(Debug, Clone)]
pub struct EnvelopeStateMachine {
    envelope_id: Uuid,
    state: EnvelopeState,
    history: Vec<Transition>,
}

impl EnvelopeStateMachine {
    pub fn new(envelope_id: Uuid) -> Self {
        Self {
            envelope_id,
            state: EnvelopeState::Pending,
            history: Vec::new(),
        }
    }

    pub fn current_state(&self) -> EnvelopeState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Apply an event, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, event: &EnvelopeEvent) -> StateMachineResult<EnvelopeState> {
        let target = Self::determine_target_state(self.state, event)?;

        trace!(
            envelope_id = %self.envelope_id,
            from = %self.state,
            to = %target,
            event = event.event_type(),
            "Envelope state transition"
        );

        self.history.push(Transition {
            from: self.state,
            to: target,
            event: event.event_type(),
            at: Utc::now(),
        });
        self.state = target;
        Ok(target)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: EnvelopeState,
        event: &EnvelopeEvent,
    ) -> StateMachineResult<EnvelopeState> {
        let target = match (current_state, event) {
            (EnvelopeState::Pending, EnvelopeEvent::Receive) => EnvelopeState::InFlight,

            (EnvelopeState::InFlight, EnvelopeEvent::Succeed) => {
                EnvelopeState::Acked(AckOutcome::Success)
            }
            (EnvelopeState::InFlight, EnvelopeEvent::ReportFailure(_)) => {
                EnvelopeState::Acked(AckOutcome::FailureReported)
            }
            (EnvelopeState::InFlight, EnvelopeEvent::Requeue { .. }) => EnvelopeState::Requeued,
            (EnvelopeState::InFlight, EnvelopeEvent::Expire) => EnvelopeState::Pending,

            (EnvelopeState::Requeued, EnvelopeEvent::Release) => EnvelopeState::Pending,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_success_path() {
        let mut sm = EnvelopeStateMachine::new(Uuid::new_v4());
        sm.transition(&EnvelopeEvent::Receive).unwrap();
        let state = sm.transition(&EnvelopeEvent::Succeed).unwrap();

        assert_eq!(state, EnvelopeState::Acked(AckOutcome::Success));
        assert!(state.is_terminal());
        assert_eq!(sm.history().len(), 2);
    }

    #[test]
    fn test_requeue_cycle() {
        let mut sm = EnvelopeStateMachine::new(Uuid::new_v4());
        sm.transition(&EnvelopeEvent::Receive).unwrap();
        sm.transition(&EnvelopeEvent::Requeue {
            delay: Duration::from_secs(1),
        })
        .unwrap();
        sm.transition(&EnvelopeEvent::Release).unwrap();
        sm.transition(&EnvelopeEvent::Receive).unwrap();
        let state = sm
            .transition(&EnvelopeEvent::ReportFailure("boom".to_string()))
            .unwrap();

        assert_eq!(state, EnvelopeState::Acked(AckOutcome::FailureReported));
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let mut sm = EnvelopeStateMachine::new(Uuid::new_v4());
        sm.transition(&EnvelopeEvent::Receive).unwrap();
        sm.transition(&EnvelopeEvent::Succeed).unwrap();

        let err = sm.transition(&EnvelopeEvent::Receive).unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidTransition { .. }));
        assert_eq!(sm.current_state(), EnvelopeState::Acked(AckOutcome::Success));
    }

    #[test]
    fn test_cannot_ack_without_receive() {
        assert!(EnvelopeStateMachine::determine_target_state(
            EnvelopeState::Pending,
            &EnvelopeEvent::Succeed
        )
        .is_err());
        assert!(EnvelopeStateMachine::determine_target_state(
            EnvelopeState::Requeued,
            &EnvelopeEvent::Receive
        )
        .is_err());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            EnvelopeState::Pending,
            EnvelopeState::InFlight,
            EnvelopeState::Acked(AckOutcome::Success),
            EnvelopeState::Acked(AckOutcome::FailureReported),
            EnvelopeState::Requeued,
        ] {
            assert_eq!(state.to_string().parse::<EnvelopeState>().unwrap(), state);
        }
    }
}
