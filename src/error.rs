//! Error types for the composition engine
//!
//! We use thiserror for domain errors and provide conversions at the
//! conductor boundary, where every failure is encoded as a `{code, error}`
//! wire object.

use thiserror::Error;

/// Errors raised while constructing or normalizing a composition.
#[derive(Debug, Error)]
pub enum CompositionError {
    /// An argument had the wrong shape for the constructor.
    #[error("invalid argument for {constructor}: {argument}")]
    InvalidArgument {
        /// Constructor that rejected the argument.
        constructor: &'static str,
        /// Rendering of the offending argument.
        argument: String,
    },

    /// An action name did not parse as a valid fully qualified name.
    #[error("invalid action name '{0}'")]
    InvalidName(String),

    /// Two attached artifacts share a name but differ in content.
    #[error("duplicate action artifact '{0}'")]
    DuplicateArtifact(String),

    /// Inline function code failed to parse at construction time.
    #[error("invalid function code: {0}")]
    InvalidFunction(#[from] EvalError),

    /// Options were not a JSON object or were not JSON-representable.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// The composition has no deployable name attached.
    #[error("composition must be named before deployment")]
    Unnamed,

    /// Reading an action source file failed.
    #[error("cannot read action file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while evaluating inline function code.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The source text did not lex or parse.
    #[error("parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset of the failure in the source.
        offset: usize,
        /// What the parser expected or found.
        message: String,
    },

    /// A name was read before any binding introduced it.
    #[error("unbound variable '{0}'")]
    Unbound(String),

    /// An operator was applied to operands of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The exec record carried a kind this evaluator does not handle.
    #[error("unsupported exec kind '{0}'")]
    UnsupportedKind(String),
}

/// Errors surfaced by the conductor outside normal FSM error propagation.
///
/// User errors (a `params.error` produced by a function, literal, or action
/// result) are not represented here; they travel through the FSM and unwind
/// to the nearest handler. These variants cover protocol violations and
/// interpreter invariant failures only.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The `$resume` payload was malformed (wire code 400).
    #[error("invalid $resume: {0}")]
    BadRequest(String),

    /// An interpreter invariant was violated (wire code 500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConductorError {
    /// Wire status code for this error.
    pub fn code(&self) -> u16 {
        match self {
            ConductorError::BadRequest(_) => 400,
            ConductorError::Internal(_) => 500,
        }
    }
}

/// Convenience result alias for composition construction.
pub type Result<T> = std::result::Result<T, CompositionError>;
