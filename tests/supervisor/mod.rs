//! Supervisor module tests.

mod retry_test;

/// Verify all public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use claude_relay::supervisor::{
        AttemptError, AttemptOutcome, AttemptState, AttemptStateMachine, NullSink,
        ProcessSupervisor, RelayError, RetryPolicy, RunContext, TimeoutPolicy,
    };

    let _ = ProcessSupervisor::new(TimeoutPolicy::default());
    let _ = RetryPolicy::default();
    let _ = RunContext::default();
    let _ = AttemptStateMachine::new();
    let _ = NullSink;

    let _: fn() -> AttemptError = || AttemptError::MissingResult;
    let _: fn() -> RelayError = || RelayError::Interrupted;
    let _ = AttemptOutcome::Success;
    let _ = AttemptState::Spawning;
}
