//! The conductor: a resumable, single-threaded interpreter for compiled
//! compositions.
//!
//! One [`Conductor::activate`] call processes a contiguous run of synchronous
//! states. It ends either at a terminal state, producing a success or error
//! outcome, or at an `action` state, producing an invocation request whose
//! payload carries the continuation. All mutable execution state lives in the
//! `(state, stack, params)` triple; the machine itself is read-only.

use std::collections::VecDeque;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::compile::compile;
use crate::compose::Composition;
use crate::error::ConductorError;
use crate::eval::{self, Environment};
use crate::fsm::{Frame, State};
use crate::protocol::{take_resume, Outcome, Resume};

/// Interpreter for one compiled composition.
#[derive(Debug, Clone)]
pub struct Conductor {
    fsm: Vec<State>,
}

impl Conductor {
    /// Wrap an already-compiled machine.
    pub fn new(fsm: Vec<State>) -> Self {
        Self { fsm }
    }

    /// Compile a composition and wrap the result.
    pub fn from_composition(composition: &Composition) -> Self {
        Self::new(compile(composition))
    }

    /// The compiled machine.
    pub fn fsm(&self) -> &[State] {
        &self.fsm
    }

    /// Run one invocation, mapping protocol failures onto error outcomes.
    pub fn activate(&self, input: Value) -> Outcome {
        match self.run(input) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failure {
                error: err.to_string(),
                code: err.code(),
            },
        }
    }

    fn run(&self, input: Value) -> Result<Outcome, ConductorError> {
        let (resume, mut params) = take_resume(input)?;
        let mut stack: VecDeque<Frame>;
        let mut state: Option<usize>;
        match resume {
            None => {
                state = Some(0);
                stack = VecDeque::new();
            }
            Some(resume) => {
                if let Some(index) = resume.state {
                    if index >= self.fsm.len() {
                        return Err(ConductorError::BadRequest(format!(
                            "$resume state {index} out of range"
                        )));
                    }
                }
                state = resume.state;
                stack = resume.stack;
                // Route an error returned by the invoked action before
                // executing anything.
                inspect(&mut params, &mut state, &mut stack);
            }
        }

        while let Some(current) = state {
            let step = self.fsm.get(current).ok_or_else(|| {
                ConductorError::Internal(format!("state {current} out of range"))
            })?;
            debug!(state = current, depth = stack.len(), "step");

            state = match step.next() {
                Some(offset) => Some(self.target(current, offset)?),
                None => None,
            };

            match step {
                State::Pass { .. } => inspect(&mut params, &mut state, &mut stack),
                State::Choice { then, r#else } => {
                    let offset = if params.get("value") == Some(&Value::Bool(true)) {
                        *then
                    } else {
                        *r#else
                    };
                    state = Some(self.target(current, offset)?);
                }
                State::Try { catch, .. } => {
                    let catch = self.target(current, *catch)?;
                    stack.push_front(Frame::Catch { catch });
                }
                State::Let { r#let, .. } => {
                    stack.push_front(Frame::Let {
                        r#let: r#let.clone(),
                    });
                }
                State::Exit { .. } => {
                    stack.pop_front().ok_or_else(|| {
                        ConductorError::Internal(format!("stack underflow at state {current}"))
                    })?;
                }
                State::Push { field, .. } => {
                    let snapshot = match field {
                        Some(name) => params.get(name).cloned().unwrap_or(Value::Null),
                        None => params.clone(),
                    };
                    stack.push_front(Frame::Params { params: snapshot });
                }
                State::Pop { collect, .. } => {
                    let frame = stack.pop_front().ok_or_else(|| {
                        ConductorError::Internal(format!("stack underflow at state {current}"))
                    })?;
                    let saved = match frame {
                        Frame::Params { params } => params,
                        other => {
                            return Err(ConductorError::Internal(format!(
                                "unexpected frame at state {current}: {other:?}"
                            )))
                        }
                    };
                    params = if *collect {
                        json!({ "params": saved, "result": params })
                    } else {
                        saved
                    };
                }
                State::Action { name, .. } => {
                    debug!(action = %name, "suspending");
                    return Ok(Outcome::Invoke {
                        action: name.clone(),
                        params,
                        resume: Resume { state, stack },
                    });
                }
                State::Literal { value, .. } => {
                    params = value.clone();
                    inspect(&mut params, &mut state, &mut stack);
                }
                State::Function { exec, .. } => {
                    let mut env = Environment::from_stack(&stack);
                    let result = eval::evaluate(exec, &params, &mut env);
                    // Mutations performed before a failure still land.
                    env.write_back(&mut stack);
                    match result {
                        Ok(Some(value)) => params = value,
                        Ok(None) => {}
                        Err(err) => {
                            warn!(state = current, error = %err, "function evaluation failed");
                            params = json!({
                                "error": format!("An exception was caught at state {current}")
                            });
                        }
                    }
                    inspect(&mut params, &mut state, &mut stack);
                }
            }
        }

        match params.get("error") {
            Some(error) => {
                let error = match error {
                    Value::String(message) => message.clone(),
                    other => other.to_string(),
                };
                Ok(Outcome::Failure { error, code: 500 })
            }
            None => Ok(Outcome::Success(params)),
        }
    }

    fn target(&self, current: usize, offset: i64) -> Result<usize, ConductorError> {
        let target = current as i64 + offset;
        if target < 0 || target as usize >= self.fsm.len() {
            return Err(ConductorError::Internal(format!(
                "state {current}: jump {offset} out of range"
            )));
        }
        Ok(target as usize)
    }
}

/// Post-step inspection: wrap non-object `params`, then route an error to
/// the nearest handler, unwinding every frame the search passes over.
fn inspect(params: &mut Value, state: &mut Option<usize>, stack: &mut VecDeque<Frame>) {
    if !params.is_object() {
        *params = json!({ "value": std::mem::take(params) });
    }
    let error = params.get("error").cloned();
    if let Some(error) = error {
        *params = json!({ "error": error });
        *state = None;
        while let Some(frame) = stack.pop_front() {
            if let Frame::Catch { catch } = frame {
                *state = Some(catch);
                break;
            }
        }
    }
}
