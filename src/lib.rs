//! Baton – a serverless composition engine
//!
//! This crate implements a small control-flow DSL whose leaf operations are
//! remote function invocations hosted by a FaaS platform:
//! - A builder surface for composing sequences, conditionals, loops,
//!   try/catch/finally, lexical bindings, value capture, and retries
//! - A compiler that lowers compositions to a flat state machine with
//!   relative jump offsets
//! - A resumable conductor that interprets the machine one invocation at a
//!   time, suspending whenever it must invoke an action and resuming via a
//!   continuation round-tripped through the platform
//! - A closed expression language for inline function states, evaluated
//!   against the composition's lexical environment

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Deployable artifacts and the platform seam.
pub mod artifact;
/// Lowering from the AST to the flat state machine.
pub mod compile;
/// Composition AST and builder constructors.
pub mod compose;
/// The resumable interpreter.
pub mod conductor;
/// Credential discovery.
pub mod config;
/// Error types.
pub mod error;
/// Inline function evaluation.
pub mod eval;
/// State machine and runtime frame types.
pub mod fsm;
/// Wire contract with the hosting platform.
pub mod protocol;

pub use artifact::{ActionArtifact, Platform, CONDUCTOR_ANNOTATION};
pub use compile::compile;
pub use compose::{
    action, action_with, finally, function, if_, if_with, let_, literal, repeat, retain,
    retain_with, retry, seq, sequence, task, try_, while_, while_with, Composition,
    IntoComposition, Node,
};
pub use conductor::Conductor;
pub use config::Credentials;
pub use error::{CompositionError, ConductorError, EvalError};
pub use fsm::{Exec, Frame, State};
pub use protocol::{Outcome, Resume, RESUME_KEY};

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
