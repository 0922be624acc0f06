//! Pure state machine for the plan → test → decide retry loop
//!
//! No I/O: `transition(state, event, max_attempts) -> (state, actions)` is
//! deterministic. The controller performs the returned actions and feeds the
//! resulting events back in. Invalid transitions go to `Failed` (never panic).

/// Retry loop state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Nothing started yet
    Idle,
    /// Generating and writing artifacts for this attempt
    Plan { attempt: usize },
    /// Running the generated test for this attempt
    Test { attempt: usize },
    /// Test passed on this attempt
    Succeeded { attempt: usize },
    /// Last allowed attempt failed
    Exhausted {
        attempt: usize,
        mismatches: Vec<String>,
    },
    /// Aborted by an error or an invalid transition
    Failed { error: String },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Succeeded { .. } | State::Exhausted { .. } | State::Failed { .. }
        )
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Begin a run for a bank
    Start { bank: String },
    /// Parser and test artifacts were written
    ArtifactsWritten,
    /// Generated test passed
    TestPassed,
    /// Generated test failed
    TestFailed { mismatches: Vec<String> },
    /// Unrecoverable error while performing an action
    Error { message: String },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Generate parser source and write both artifacts
    Generate { attempt: usize },
    /// Run the generated test
    RunTests { attempt: usize },
    /// Record progress
    LogActivity { message: String },
}

/// Pure state transition function
///
/// `max_attempts` below one is treated as one.
pub fn transition(state: State, event: Event, max_attempts: usize) -> (State, Vec<Action>) {
    let max_attempts = max_attempts.max(1);

    match (state, event) {
        (State::Idle, Event::Start { bank }) => (
            State::Plan { attempt: 1 },
            vec![
                Action::LogActivity {
                    message: format!(
                        "Starting parser generation for {} (max {} attempts)",
                        bank, max_attempts
                    ),
                },
                Action::Generate { attempt: 1 },
            ],
        ),

        (State::Plan { attempt }, Event::ArtifactsWritten) => (
            State::Test { attempt },
            vec![Action::RunTests { attempt }],
        ),

        (State::Test { attempt }, Event::TestPassed) => (
            State::Succeeded { attempt },
            vec![Action::LogActivity {
                message: format!("Attempt {} succeeded", attempt),
            }],
        ),

        (State::Test { attempt }, Event::TestFailed { mismatches }) => {
            if attempt >= max_attempts {
                (
                    State::Exhausted {
                        attempt,
                        mismatches: mismatches.clone(),
                    },
                    vec![Action::LogActivity {
                        message: format!(
                            "Max attempts ({}) reached, mismatches: {:?}",
                            max_attempts, mismatches
                        ),
                    }],
                )
            } else {
                let next = attempt + 1;
                (
                    State::Plan { attempt: next },
                    vec![
                        Action::LogActivity {
                            message: format!(
                                "Attempt {} failed, mismatches: {:?}",
                                attempt, mismatches
                            ),
                        },
                        Action::Generate { attempt: next },
                    ],
                )
            }
        }

        // Error events from any non-terminal state
        (State::Idle, Event::Error { message })
        | (State::Plan { .. }, Event::Error { message })
        | (State::Test { .. }, Event::Error { message }) => (
            State::Failed {
                error: message.clone(),
            },
            vec![Action::LogActivity {
                message: format!("Error: {}", message),
            }],
        ),

        // All other transitions are invalid, including any event on a terminal state
        (state, event) => (
            State::Failed {
                error: format!(
                    "Invalid state transition: {:?} cannot handle event {:?}",
                    state, event
                ),
            },
            vec![],
        ),
    }
}
