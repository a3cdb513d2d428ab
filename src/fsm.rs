//! Flat state machine produced by the compiler and executed by the conductor.
//!
//! A compiled composition is an ordered sequence of [`State`] records. Jump
//! fields (`next`, `then`, `else`, `catch`) hold signed offsets relative to
//! the owning state's index; a missing `next` on the state the interpreter
//! ends on encodes program completion. The runtime stack is a list of
//! [`Frame`] values, newest first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Exec kind handled by the built-in expression evaluator.
pub const EXEC_KIND_EXPR: &str = "expr:default";

/// Inline code record carried by `function` nodes and states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exec {
    /// Evaluator identifier, e.g. [`EXEC_KIND_EXPR`].
    pub kind: String,
    /// Source text evaluated against the lexical environment.
    pub code: String,
}

impl Exec {
    /// Wrap source text with the default expression kind.
    pub fn expr(code: impl Into<String>) -> Self {
        Self {
            kind: EXEC_KIND_EXPR.to_string(),
            code: code.into(),
        }
    }
}

/// One state of the compiled machine.
///
/// The serialized form is a JSON object tagged by `type`, matching the shape
/// embedded into deployable artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum State {
    /// No-op; runs inspection and advances.
    Pass {
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Suspension point: the conductor returns an invocation request for
    /// `name` and resumes at `next` with the action's result.
    Action {
        /// Fully qualified action name to invoke.
        name: String,
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Evaluate inline code against the lexical environment.
    Function {
        /// Code record to evaluate.
        exec: Exec,
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Replace `params` with a deep clone of `value`.
    Literal {
        /// Literal JSON value.
        value: Value,
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Branch on `params.value`: strict `true` takes `then`, anything else
    /// takes `else`.
    Choice {
        /// Relative offset taken when `params.value == true`.
        then: i64,
        /// Relative offset taken otherwise.
        r#else: i64,
    },
    /// Snapshot `params` (or one of its fields) onto the stack.
    Push {
        /// Field of `params` to snapshot instead of the whole value.
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Remove the newest `params` frame. With `collect`, pair it with the
    /// current value as `{params, result}` instead of restoring it.
    Pop {
        /// Whether to collect rather than restore.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        collect: bool,
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Install a frame of lexical bindings.
    Let {
        /// Declared bindings, deep-cloned into the frame on install.
        r#let: Map<String, Value>,
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Remove the newest frame (closes a `try` or `let` scope).
    Exit {
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
    /// Install an error handler frame.
    Try {
        /// Relative offset of the handler entry state.
        catch: i64,
        /// Relative offset of the successor state.
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<i64>,
    },
}

impl State {
    /// The relative successor offset, if any. `Choice` has none; it always
    /// transfers through `then`/`else`.
    pub fn next(&self) -> Option<i64> {
        match self {
            State::Pass { next }
            | State::Action { next, .. }
            | State::Function { next, .. }
            | State::Literal { next, .. }
            | State::Push { next, .. }
            | State::Pop { next, .. }
            | State::Let { next, .. }
            | State::Exit { next }
            | State::Try { next, .. } => *next,
            State::Choice { .. } => None,
        }
    }

    /// Set the successor offset. Used by the compiler when chaining blocks;
    /// a `Choice` never carries one and is left untouched.
    pub(crate) fn link(&mut self, offset: i64) {
        match self {
            State::Pass { next }
            | State::Action { next, .. }
            | State::Function { next, .. }
            | State::Literal { next, .. }
            | State::Push { next, .. }
            | State::Pop { next, .. }
            | State::Let { next, .. }
            | State::Exit { next }
            | State::Try { next, .. } => *next = Some(offset),
            State::Choice { .. } => {}
        }
    }
}

/// A frame on the conductor's runtime stack.
///
/// The serialized forms are single-field objects (`{"catch": n}`,
/// `{"let": {...}}`, `{"params": ...}`) so continuations round-trip through
/// the platform as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Error handler installed by `try`; holds an absolute state index.
    Catch {
        /// Absolute index of the handler entry state.
        catch: usize,
    },
    /// Lexical bindings installed by `let`.
    Let {
        /// Binding map, owned by this frame.
        r#let: Map<String, Value>,
    },
    /// Saved `params` installed by `push`.
    Params {
        /// Deep-cloned snapshot.
        params: Value,
    },
}

/// Check that every jump in `fsm` lands inside the machine.
///
/// The compiler only produces in-range offsets; this is the guard used by
/// tests and by tools that load machines from untrusted JSON.
pub fn validate_offsets(fsm: &[State]) -> std::result::Result<(), String> {
    let len = fsm.len() as i64;
    let check = |index: usize, offset: i64, kind: &str| {
        let target = index as i64 + offset;
        if target < 0 || target >= len {
            Err(format!(
                "state {index}: {kind} offset {offset} lands outside [0, {}]",
                len - 1
            ))
        } else {
            Ok(())
        }
    };
    for (index, state) in fsm.iter().enumerate() {
        if let Some(next) = state.next() {
            check(index, next, "next")?;
        }
        match state {
            State::Choice { then, r#else } => {
                check(index, *then, "then")?;
                check(index, *r#else, "else")?;
            }
            State::Try { catch, .. } => check(index, *catch, "catch")?,
            _ => {}
        }
    }
    Ok(())
}
