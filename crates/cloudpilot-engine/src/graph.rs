//! The graph driver: an explicit loop over the stage table.
//!
//! Each stage returns an overlay; the driver merges overlays in emission
//! order, streams them to an observer, enforces the hard stage-entry cap,
//! honors cancellation between stages, and pauses the turn when the
//! presentation preparer asks for user input. Every path ends in the
//! memory save.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use cloudpilot_core::presentation::Presentation;
use cloudpilot_core::stage::StageName;
use cloudpilot_core::state::{StateUpdate, TurnState};

use crate::cancel::CancelToken;
use crate::nodes::Stage;
use crate::supervisor::RECURSION_LIMIT_MESSAGE;

/// Streaming observer over `(stage, overlay)` pairs.
pub type StageObserver = dyn Fn(StageName, &StateUpdate) + Send + Sync;

/// How a driven turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutcome {
    /// The turn ran to completion.
    Completed(Box<TurnState>),
    /// The turn is suspended awaiting user input; resume with the reply.
    Suspended(Box<TurnState>),
    /// The turn was cancelled; memory was still saved.
    Cancelled(Box<TurnState>),
}

impl DriverOutcome {
    pub fn state(&self) -> &TurnState {
        match self {
            DriverOutcome::Completed(state)
            | DriverOutcome::Suspended(state)
            | DriverOutcome::Cancelled(state) => state,
        }
    }

    pub fn into_state(self) -> TurnState {
        match self {
            DriverOutcome::Completed(state)
            | DriverOutcome::Suspended(state)
            | DriverOutcome::Cancelled(state) => *state,
        }
    }
}

/// Binds the stages into a runnable pipeline.
pub struct GraphDriver {
    stages: HashMap<StageName, Arc<dyn Stage>>,
}

impl GraphDriver {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        let stages = stages
            .into_iter()
            .map(|stage| (stage.name(), stage))
            .collect();
        GraphDriver { stages }
    }

    /// Drives a turn from `start` until the memory save completes.
    pub async fn run(
        &self,
        mut state: TurnState,
        start: StageName,
        cancel: &CancelToken,
        observer: Option<&StageObserver>,
    ) -> DriverOutcome {
        let mut current = start;
        let mut entries: u32 = 0;
        let mut suspended = false;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() && !cancelled && current != StageName::MemorySave {
                debug!("turn cancelled, saving memory and exiting");
                cancelled = true;
                let mut presentation = Presentation::chat(
                    "The operation was cancelled. No further changes have been made.",
                );
                presentation.action_cancelled = true;
                state.presentation = Some(presentation);
                state.action_cancelled = true;
                current = StageName::MemorySave;
            }

            entries += 1;
            if entries > state.max_recursion && current != StageName::MemorySave {
                // Backstop behind the supervisor's own guard.
                warn!(entries, "stage-entry cap reached, forcing termination");
                if state.presentation.is_none() {
                    state.presentation = Some(Presentation::chat(RECURSION_LIMIT_MESSAGE));
                }
                current = StageName::MemorySave;
            }

            let Some(stage) = self.stages.get(&current) else {
                warn!(stage = %current, "no implementation bound for stage");
                state.presentation = Some(Presentation::chat(RECURSION_LIMIT_MESSAGE));
                current = StageName::MemorySave;
                continue;
            };

            debug!(stage = %current, entries, "entering stage");
            let started = Instant::now();
            let mut update = stage.run(&state).await;
            update
                .timings
                .push((current.as_str().to_string(), started.elapsed().as_secs_f64()));

            if let Some(observer) = observer {
                observer(current, &update);
            }
            update.apply(&mut state);

            if current == StageName::MemorySave {
                break;
            }

            match state.next_step.take() {
                Some(StageName::UserInputRequired) => {
                    debug!("turn suspended awaiting user input");
                    suspended = true;
                    current = StageName::MemorySave;
                }
                Some(next) => current = next,
                None => {
                    // Exactly one of next_step/terminal must be set; a
                    // stage that sets neither falls through to the end of
                    // the turn.
                    warn!(stage = %current, "stage set no next_step, ending turn");
                    current = if current == StageName::Presentation {
                        StageName::MemorySave
                    } else {
                        StageName::Presentation
                    };
                }
            }
        }

        if cancelled {
            DriverOutcome::Cancelled(Box::new(state))
        } else if suspended {
            DriverOutcome::Suspended(Box::new(state))
        } else {
            DriverOutcome::Completed(Box::new(state))
        }
    }
}
