//! Wire contract between the conductor and its hosting platform.
//!
//! Each invocation either terminates (`{params}` on success, `{error, code}`
//! on failure) or suspends with an action-invocation request whose payload
//! carries the continuation under the `$resume` key. The platform is expected
//! to merge `$resume` into the invoked action's result and hand the combined
//! object back on the next invocation.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ConductorError;
use crate::fsm::Frame;

/// Key under which the continuation travels in action parameters.
pub const RESUME_KEY: &str = "$resume";

/// Continuation round-tripped through the platform between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resume {
    /// Index of the state to resume at; absent when the machine already ran
    /// off the end and only termination handling remains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<usize>,
    /// Runtime stack, newest frame first.
    pub stack: VecDeque<Frame>,
}

/// Split a `$resume` continuation out of incoming params.
///
/// Returns the continuation, if one was present, together with the remaining
/// user fields. A present-but-malformed continuation is a bad request.
pub fn take_resume(params: Value) -> Result<(Option<Resume>, Value), ConductorError> {
    match params {
        Value::Object(mut map) => match map.remove(RESUME_KEY) {
            None => Ok((None, Value::Object(map))),
            Some(raw) => {
                let resume: Resume = serde_json::from_value(raw).map_err(|err| {
                    ConductorError::BadRequest(format!("malformed $resume: {err}"))
                })?;
                Ok((Some(resume), Value::Object(map)))
            }
        },
        other => Ok((None, other)),
    }
}

/// Result of one conductor invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Terminal success; encodes as `{params}`.
    Success(Value),
    /// Terminal failure; encodes as `{error, code}`.
    Failure {
        /// Error message.
        error: String,
        /// Wire status code (500 for errors propagated through the machine).
        code: u16,
    },
    /// Suspension: the platform must invoke `action` with `params` and feed
    /// the result, merged with the continuation, back to the conductor.
    Invoke {
        /// Fully qualified action name.
        action: String,
        /// Input for the invoked action.
        params: Value,
        /// Continuation to merge into the action's result.
        resume: Resume,
    },
}

impl Outcome {
    /// Encode the outcome in its wire form.
    pub fn to_value(&self) -> Value {
        match self {
            Outcome::Success(params) => json!({ "params": params }),
            Outcome::Failure { error, code } => json!({ "error": error, "code": code }),
            Outcome::Invoke {
                action,
                params,
                resume,
            } => json!({
                "action": action,
                "params": params,
                "state": { (RESUME_KEY): resume },
            }),
        }
    }
}
