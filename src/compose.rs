//! Composition AST and its builder surface.
//!
//! Compositions are built with the free constructors in this module
//! (`sequence`, `if_`, `while_`, `try_`, `finally`, `let_`, `literal`,
//! `function`, `action`, `retain`, `repeat`, `retry`; Rust keyword clashes
//! take a trailing underscore). Every constructor validates its arguments,
//! normalizes the result, and hoists action artifacts attached by children,
//! so a [`Composition`] is always in the form the compiler expects:
//! sequences are fully flattened and the sugared forms (`repeat`, `retry`,
//! `retain` with `filter`/`catch`) are already expressed in terms of the
//! core constructs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::artifact::ActionArtifact;
use crate::error::{CompositionError, Result};
use crate::eval;
use crate::fsm::{Exec, EXEC_KIND_EXPR};

/// A normalized composition node. The serialized form is a JSON object
/// tagged by `type`; this is the value stored under the `conductor`
/// annotation of a deployed composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    /// Ordered list of components, fully flattened.
    Sequence {
        /// The flattened children.
        components: Vec<Node>,
    },
    /// Invocation of a named platform action.
    Action {
        /// Fully qualified action name.
        name: String,
    },
    /// Inline code evaluated against the lexical environment.
    Function {
        /// Code record.
        exec: Exec,
    },
    /// Constant JSON value.
    Literal {
        /// The value, replacing `params` when executed.
        value: Value,
    },
    /// Two-way branch on the test's result.
    If {
        /// Condition composition.
        test: Box<Node>,
        /// Branch taken when the test yields `true`.
        consequent: Box<Node>,
        /// Branch taken otherwise.
        alternate: Box<Node>,
        /// Recognized key: `nosave`. Unrecognized keys are preserved.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        options: Map<String, Value>,
    },
    /// Loop while the test yields `true`.
    While {
        /// Condition composition.
        test: Box<Node>,
        /// Loop body.
        body: Box<Node>,
        /// Recognized key: `nosave`. Unrecognized keys are preserved.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        options: Map<String, Value>,
    },
    /// Error handler scope.
    Try {
        /// Protected body.
        body: Box<Node>,
        /// Handler run with the error value when the body fails.
        handler: Box<Node>,
    },
    /// Finalizer scope; the finalizer runs on success and on error.
    Finally {
        /// Protected body.
        body: Box<Node>,
        /// Finalizer run with the body's result or error.
        finalizer: Box<Node>,
    },
    /// Lexical bindings scoped to a body.
    Let {
        /// Declared bindings.
        declarations: Map<String, Value>,
        /// Scope body.
        body: Box<Node>,
    },
    /// Snapshot `params` around a body and pair it with the result.
    Retain {
        /// Body to execute against the current `params`.
        body: Box<Node>,
        /// Recognized key: `field`. Unrecognized keys are preserved.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        options: Map<String, Value>,
    },
}

/// A composition plus the action artifacts its constructors attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    node: Node,
    actions: Vec<ActionArtifact>,
    name: Option<String>,
}

impl Composition {
    fn new(node: Node, actions: Vec<ActionArtifact>) -> Self {
        Self {
            node,
            actions,
            name: None,
        }
    }

    /// The normalized AST.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Action artifacts hoisted from this composition's constructors.
    pub fn actions(&self) -> &[ActionArtifact] {
        &self.actions
    }

    /// The deployable name, if [`Composition::named`] attached one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Attach a deployable identity. The name is qualified the same way
    /// action names are.
    pub fn named(mut self, name: &str) -> Result<Self> {
        self.name = Some(qualify(name)?);
        Ok(self)
    }

    /// Serialize the AST (without artifacts) to its annotation form.
    pub fn ast_value(&self) -> Value {
        serde_json::to_value(&self.node).unwrap_or(Value::Null)
    }

    /// Rebuild a composition from a serialized AST, re-running validation.
    /// This is how tools recover the source composition from the `conductor`
    /// annotation of a deployed artifact.
    pub fn from_value(value: Value) -> Result<Self> {
        let node: Node = serde_json::from_value(value)
            .map_err(|err| CompositionError::InvalidArgument {
                constructor: "composition",
                argument: err.to_string(),
            })?;
        validate_node(&node)?;
        Ok(Self::new(node, Vec::new()))
    }
}

/// Values that coerce into a composition: a composition (itself), a string
/// (an action by that name), an [`Exec`] record (a function), `()` (the
/// empty sequence), or a constructor result.
pub trait IntoComposition {
    /// Perform the coercion, surfacing construction errors.
    fn into_composition(self) -> Result<Composition>;
}

impl IntoComposition for Composition {
    fn into_composition(self) -> Result<Composition> {
        Ok(self)
    }
}

impl IntoComposition for Result<Composition> {
    fn into_composition(self) -> Result<Composition> {
        self
    }
}

impl IntoComposition for &str {
    fn into_composition(self) -> Result<Composition> {
        action(self)
    }
}

impl IntoComposition for String {
    fn into_composition(self) -> Result<Composition> {
        action(&self)
    }
}

impl IntoComposition for Exec {
    fn into_composition(self) -> Result<Composition> {
        function(self)
    }
}

impl IntoComposition for () {
    fn into_composition(self) -> Result<Composition> {
        Ok(Composition::new(
            Node::Sequence {
                components: Vec::new(),
            },
            Vec::new(),
        ))
    }
}

/// Sources of inline code for [`function`]: a source string (wrapped with
/// the default expression kind) or a full [`Exec`] record.
pub trait IntoExec {
    /// Produce the exec record.
    fn into_exec(self) -> Exec;
}

impl IntoExec for &str {
    fn into_exec(self) -> Exec {
        Exec::expr(self)
    }
}

impl IntoExec for String {
    fn into_exec(self) -> Exec {
        Exec::expr(self)
    }
}

impl IntoExec for Exec {
    fn into_exec(self) -> Exec {
        self
    }
}

/// Coerce a single value into a composition (see [`IntoComposition`]).
pub fn task(t: impl IntoComposition) -> Result<Composition> {
    t.into_composition()
}

/// Build a sequence from components, flattening nested sequences and
/// hoisting their artifacts. A one-element sequence collapses to its
/// element; an empty one stays an empty sequence.
pub fn sequence<I, T>(components: I) -> Result<Composition>
where
    I: IntoIterator<Item = T>,
    T: IntoComposition,
{
    let mut nodes = Vec::new();
    let mut actions = Vec::new();
    for component in components {
        let component = component.into_composition()?;
        actions = merge_artifacts(actions, component.actions)?;
        match component.node {
            Node::Sequence { components } => nodes.extend(components),
            other => nodes.push(other),
        }
    }
    let node = if nodes.len() == 1 {
        nodes.swap_remove(0)
    } else {
        Node::Sequence { components: nodes }
    };
    Ok(Composition::new(node, actions))
}

/// Alias for [`sequence`].
pub fn seq<I, T>(components: I) -> Result<Composition>
where
    I: IntoIterator<Item = T>,
    T: IntoComposition,
{
    sequence(components)
}

/// A constant composition producing `value`.
pub fn literal(value: impl Into<Value>) -> Result<Composition> {
    Ok(Composition::new(
        Node::Literal {
            value: value.into(),
        },
        Vec::new(),
    ))
}

/// An inline function. Source code must parse in the expression language and
/// the exec kind must be one this engine can evaluate; both are checked here
/// so broken code never reaches a deployed machine.
pub fn function(code: impl IntoExec) -> Result<Composition> {
    let exec = code.into_exec();
    if exec.kind != EXEC_KIND_EXPR {
        return Err(CompositionError::InvalidArgument {
            constructor: "function",
            argument: format!("unsupported exec kind '{}'", exec.kind),
        });
    }
    eval::check(&exec.code)?;
    Ok(Composition::new(Node::Function { exec }, Vec::new()))
}

/// An action invocation by name. Unqualified names gain the default
/// namespace.
pub fn action(name: &str) -> Result<Composition> {
    action_with(name, Value::Null)
}

/// An action invocation with artifact options: `sequence` (list of action
/// names forming a native sequence), `filename` (path to the action's code),
/// or `action` (the artifact body, an object or inline code string).
pub fn action_with(name: &str, options: Value) -> Result<Composition> {
    let qualified = qualify(name)?;
    let options = match options {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(CompositionError::InvalidOptions(format!(
                "expected an object, found {other}"
            )))
        }
    };

    let mut actions = Vec::new();
    if let Some(components) = options.get("sequence") {
        let components = components
            .as_array()
            .ok_or_else(|| CompositionError::InvalidOptions("sequence must be an array".into()))?;
        let mut qualified_components = Vec::new();
        for component in components {
            let text = component.as_str().ok_or_else(|| {
                CompositionError::InvalidOptions("sequence entries must be action names".into())
            })?;
            qualified_components.push(Value::String(qualify(text)?));
        }
        actions.push(ActionArtifact {
            name: qualified.clone(),
            action: json!({"exec": {"kind": "sequence", "components": qualified_components}}),
        });
    } else if let Some(filename) = options.get("filename") {
        let path = filename.as_str().ok_or_else(|| {
            CompositionError::InvalidOptions("filename must be a string".into())
        })?;
        let code = std::fs::read_to_string(path)?;
        actions.push(ActionArtifact {
            name: qualified.clone(),
            action: json!({"exec": {"kind": "nodejs:default", "code": code}}),
        });
    } else if let Some(body) = options.get("action") {
        let action = match body {
            Value::String(code) => json!({"exec": {"kind": "nodejs:default", "code": code}}),
            Value::Object(_) => body.clone(),
            other => {
                return Err(CompositionError::InvalidOptions(format!(
                    "action body must be an object or code string, found {other}"
                )))
            }
        };
        actions.push(ActionArtifact {
            name: qualified.clone(),
            action,
        });
    }

    Ok(Composition::new(Node::Action { name: qualified }, actions))
}

/// A two-way branch. The chosen branch observes the `params` from before the
/// test ran; with the `nosave` option it observes the test's output instead.
pub fn if_(
    test: impl IntoComposition,
    consequent: impl IntoComposition,
    alternate: impl IntoComposition,
) -> Result<Composition> {
    if_with(test, consequent, alternate, Value::Null)
}

/// [`if_`] with options. Recognized: `nosave: bool`.
pub fn if_with(
    test: impl IntoComposition,
    consequent: impl IntoComposition,
    alternate: impl IntoComposition,
    options: Value,
) -> Result<Composition> {
    let options = branch_options(options)?;
    let test = test.into_composition()?;
    let consequent = consequent.into_composition()?;
    let alternate = alternate.into_composition()?;
    let actions = merge_artifacts(
        merge_artifacts(test.actions, consequent.actions)?,
        alternate.actions,
    )?;
    Ok(Composition::new(
        Node::If {
            test: Box::new(test.node),
            consequent: Box::new(consequent.node),
            alternate: Box::new(alternate.node),
            options,
        },
        actions,
    ))
}

/// A loop. Each iteration's body observes the `params` from before the test
/// ran; with the `nosave` option it observes the test's output instead.
pub fn while_(test: impl IntoComposition, body: impl IntoComposition) -> Result<Composition> {
    while_with(test, body, Value::Null)
}

/// [`while_`] with options. Recognized: `nosave: bool`.
pub fn while_with(
    test: impl IntoComposition,
    body: impl IntoComposition,
    options: Value,
) -> Result<Composition> {
    let options = branch_options(options)?;
    let test = test.into_composition()?;
    let body = body.into_composition()?;
    let actions = merge_artifacts(test.actions, body.actions)?;
    Ok(Composition::new(
        Node::While {
            test: Box::new(test.node),
            body: Box::new(body.node),
            options,
        },
        actions,
    ))
}

/// An error handler scope: run `body`; on error, run `handler` with the
/// error value.
pub fn try_(body: impl IntoComposition, handler: impl IntoComposition) -> Result<Composition> {
    let body = body.into_composition()?;
    let handler = handler.into_composition()?;
    let actions = merge_artifacts(body.actions, handler.actions)?;
    Ok(Composition::new(
        Node::Try {
            body: Box::new(body.node),
            handler: Box::new(handler.node),
        },
        actions,
    ))
}

/// A finalizer scope: run `body`, then run `finalizer` with the body's
/// result or error.
pub fn finally(body: impl IntoComposition, finalizer: impl IntoComposition) -> Result<Composition> {
    let body = body.into_composition()?;
    let finalizer = finalizer.into_composition()?;
    let actions = merge_artifacts(body.actions, finalizer.actions)?;
    Ok(Composition::new(
        Node::Finally {
            body: Box::new(body.node),
            finalizer: Box::new(finalizer.node),
        },
        actions,
    ))
}

/// Lexical bindings scoped to a body. Declarations must be a JSON object;
/// each binding is deep-cloned into the frame when the scope is entered.
pub fn let_(declarations: Value, body: impl IntoComposition) -> Result<Composition> {
    let declarations = match declarations {
        Value::Object(map) => map,
        other => {
            return Err(CompositionError::InvalidArgument {
                constructor: "let",
                argument: format!("declarations must be an object, found {other}"),
            })
        }
    };
    let body = body.into_composition()?;
    Ok(Composition::new(
        Node::Let {
            declarations,
            body: Box::new(body.node),
        },
        body.actions,
    ))
}

/// Snapshot `params` around `body` and produce `{params, result}`.
pub fn retain(body: impl IntoComposition) -> Result<Composition> {
    retain_with(body, Value::Null)
}

/// [`retain`] with options. Recognized, consumed in this order: `filter`
/// (exec code computing the snapshot from `params`), `catch: bool` (snapshot
/// survives body errors), `field` (snapshot a single field of `params`).
pub fn retain_with(body: impl IntoComposition, options: Value) -> Result<Composition> {
    let mut options = match options {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(CompositionError::InvalidOptions(format!(
                "expected an object, found {other}"
            )))
        }
    };

    if let Some(filter) = options.remove("filter") {
        let filter = exec_from_option("retain", filter)?;
        eval::check(&filter.code)?;
        // Compute the filtered snapshot next to the original value, then
        // retain against the snapshot while the body sees the original.
        let capture = function(format!("{{orig: params, filtered: ({})}}", filter.code))?;
        let restore = function("params.orig")?;
        let mut inner_options = options;
        inner_options.insert("field".to_string(), Value::String("filtered".to_string()));
        return sequence([
            capture,
            retain_with(sequence([restore, body.into_composition()?])?, Value::Object(inner_options))?,
        ]);
    }

    if options.remove("catch").is_some_and(|flag| flag == json!(true)) {
        // Wrap the body's outcome (error included) so the snapshot frame is
        // collected even on failure, then unwrap.
        let wrapped = finally(body, function("{result: params}")?)?;
        let unwrap = function("{params: params.params, result: params.result.result}")?;
        return sequence([retain_with(wrapped, Value::Object(options))?, unwrap]);
    }

    if let Some(field) = options.get("field") {
        if !field.is_string() {
            return Err(CompositionError::InvalidOptions(
                "field must be a string".into(),
            ));
        }
    }
    let body = body.into_composition()?;
    Ok(Composition::new(
        Node::Retain {
            body: Box::new(body.node),
            options,
        },
        body.actions,
    ))
}

/// Run `body` a fixed number of times.
pub fn repeat(count: i64, body: impl IntoComposition) -> Result<Composition> {
    let_(
        json!({ "count": count }),
        while_(function("(count = count - 1) >= 0")?, body),
    )
}

/// Run `body`, retrying up to `count` more times while it keeps producing an
/// error. The original `params` are restored before every attempt.
pub fn retry(count: i64, body: impl IntoComposition) -> Result<Composition> {
    let attempt = retain_with(body, json!({ "catch": true }))?;
    let_(
        json!({ "count": count }),
        sequence([
            task(attempt.clone())?,
            while_(
                function("params.result.error != null && (count = count - 1) >= 0")?,
                finally(function("params.params")?, attempt)?,
            )?,
            function("params.result")?,
        ]),
    )
}

/// Qualify an action name with the default namespace where needed.
///
/// Accepted shapes: `name`, `package/name`, `/namespace/name`,
/// `/namespace/package/name`.
pub(crate) fn qualify(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CompositionError::InvalidName(name.to_string()));
    }
    let (leading_slash, rest) = match trimmed.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(CompositionError::InvalidName(name.to_string()));
    }
    match (leading_slash, segments.len()) {
        (true, 2) | (true, 3) => Ok(trimmed.to_string()),
        (false, 1) | (false, 2) => Ok(format!("/_/{rest}")),
        _ => Err(CompositionError::InvalidName(name.to_string())),
    }
}

fn branch_options(options: Value) -> Result<Map<String, Value>> {
    let options = match options {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(CompositionError::InvalidOptions(format!(
                "expected an object, found {other}"
            )))
        }
    };
    if let Some(nosave) = options.get("nosave") {
        if !nosave.is_boolean() {
            return Err(CompositionError::InvalidOptions(
                "nosave must be a boolean".into(),
            ));
        }
    }
    Ok(options)
}

fn exec_from_option(constructor: &'static str, value: Value) -> Result<Exec> {
    match value {
        Value::String(code) => Ok(Exec::expr(code)),
        object @ Value::Object(_) => serde_json::from_value::<Exec>(object.clone())
            .ok()
            .filter(|exec| exec.kind == EXEC_KIND_EXPR)
            .ok_or_else(|| CompositionError::InvalidArgument {
                constructor,
                argument: object.to_string(),
            }),
        other => Err(CompositionError::InvalidArgument {
            constructor,
            argument: other.to_string(),
        }),
    }
}

pub(crate) fn merge_artifacts(
    mut into: Vec<ActionArtifact>,
    from: Vec<ActionArtifact>,
) -> Result<Vec<ActionArtifact>> {
    for artifact in from {
        match into.iter().find(|existing| existing.name == artifact.name) {
            Some(existing) if existing.action == artifact.action => {}
            Some(_) => return Err(CompositionError::DuplicateArtifact(artifact.name)),
            None => into.push(artifact),
        }
    }
    Ok(into)
}

/// Re-validate a deserialized AST the way the constructors would.
fn validate_node(node: &Node) -> Result<()> {
    match node {
        Node::Sequence { components } => {
            for component in components {
                validate_node(component)?;
            }
            Ok(())
        }
        Node::Action { name } => qualify(name).map(|_| ()),
        Node::Function { exec } => {
            if exec.kind != EXEC_KIND_EXPR {
                return Err(CompositionError::InvalidArgument {
                    constructor: "function",
                    argument: format!("unsupported exec kind '{}'", exec.kind),
                });
            }
            eval::check(&exec.code)?;
            Ok(())
        }
        Node::Literal { .. } => Ok(()),
        Node::If {
            test,
            consequent,
            alternate,
            ..
        } => {
            validate_node(test)?;
            validate_node(consequent)?;
            validate_node(alternate)
        }
        Node::While { test, body, .. } => {
            validate_node(test)?;
            validate_node(body)
        }
        Node::Try { body, handler } => {
            validate_node(body)?;
            validate_node(handler)
        }
        Node::Finally { body, finalizer } => {
            validate_node(body)?;
            validate_node(finalizer)
        }
        Node::Let { body, .. } => validate_node(body),
        Node::Retain { body, .. } => validate_node(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_flatten_and_collapse() {
        let nested = sequence([
            sequence([literal(1), literal(2)]).unwrap(),
            literal(3).unwrap(),
        ])
        .unwrap();
        match nested.node() {
            Node::Sequence { components } => assert_eq!(components.len(), 3),
            other => panic!("expected sequence, got {other:?}"),
        }

        let single = sequence([literal(42)]).unwrap();
        assert!(matches!(single.node(), Node::Literal { .. }));

        let empty = task(()).unwrap();
        match empty.node() {
            Node::Sequence { components } => assert!(components.is_empty()),
            other => panic!("expected empty sequence, got {other:?}"),
        }
    }

    #[test]
    fn strings_coerce_to_qualified_actions() {
        let composed = sequence(["first", "second"]).unwrap();
        match composed.node() {
            Node::Sequence { components } => {
                assert_eq!(
                    components[0],
                    Node::Action {
                        name: "/_/first".into()
                    }
                );
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn action_names_validate() {
        assert_eq!(qualify("echo").unwrap(), "/_/echo");
        assert_eq!(qualify("utils/echo").unwrap(), "/_/utils/echo");
        assert_eq!(qualify("/ns/echo").unwrap(), "/ns/echo");
        assert_eq!(qualify("/ns/utils/echo").unwrap(), "/ns/utils/echo");
        assert!(qualify("").is_err());
        assert!(qualify("/ns").is_err());
        assert!(qualify("a//b").is_err());
        assert!(qualify("/a/b/c/d").is_err());
    }

    #[test]
    fn function_rejects_bad_code_at_build_time() {
        assert!(function("{x: params.x + 1}").is_ok());
        assert!(function("1 +").is_err());
        let foreign = Exec {
            kind: "nodejs:default".into(),
            code: "() => ({})".into(),
        };
        assert!(function(foreign).is_err());
    }

    #[test]
    fn let_requires_object_declarations() {
        assert!(let_(json!({"count": 1}), literal(1)).is_ok());
        assert!(let_(json!(3), literal(1)).is_err());
    }

    #[test]
    fn branch_options_validate_nosave() {
        assert!(if_with(literal(1), literal(2), literal(3), json!({"nosave": true})).is_ok());
        assert!(if_with(literal(1), literal(2), literal(3), json!({"nosave": 1})).is_err());
        // Unrecognized keys are preserved.
        let composed =
            if_with(literal(1), literal(2), literal(3), json!({"label": "x"})).unwrap();
        match composed.node() {
            Node::If { options, .. } => assert_eq!(options.get("label"), Some(&json!("x"))),
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn native_sequences_become_artifacts() {
        let composed = action_with("all", json!({"sequence": ["one", "/ns/two"]})).unwrap();
        assert_eq!(composed.actions().len(), 1);
        let artifact = &composed.actions()[0];
        assert_eq!(artifact.name, "/_/all");
        assert_eq!(
            artifact.action,
            json!({"exec": {"kind": "sequence", "components": ["/_/one", "/ns/two"]}})
        );
    }

    #[test]
    fn filename_actions_read_code_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "function main() {{ return {{}}; }}").unwrap();
        let path = file.path().to_str().unwrap();

        let composed = action_with("fromfile", json!({"filename": path})).unwrap();
        assert_eq!(composed.actions().len(), 1);
        let artifact = &composed.actions()[0];
        assert_eq!(artifact.name, "/_/fromfile");
        assert_eq!(
            artifact.action,
            json!({"exec": {"kind": "nodejs:default", "code": "function main() { return {}; }"}})
        );
    }

    #[test]
    fn missing_action_file_is_an_io_error() {
        assert!(matches!(
            action_with("fromfile", json!({"filename": "/nonexistent/action.js"})),
            Err(CompositionError::Io(_))
        ));
    }

    #[test]
    fn conflicting_artifacts_are_rejected_and_identical_ones_dedup() {
        let a = action_with("dup", json!({"action": {"exec": {"kind": "sequence"}}})).unwrap();
        let b = action_with("dup", json!({"action": {"exec": {"kind": "sequence"}}})).unwrap();
        let merged = sequence([a.clone(), b]).unwrap();
        assert_eq!(merged.actions().len(), 1);

        let c = action_with("dup", json!({"action": {"exec": {"kind": "other"}}})).unwrap();
        assert!(matches!(
            sequence([a, c]),
            Err(CompositionError::DuplicateArtifact(_))
        ));
    }

    #[test]
    fn repeat_desugars_to_counted_loop() {
        let composed = repeat(3, literal(json!({}))).unwrap();
        match composed.node() {
            Node::Let {
                declarations,
                body,
            } => {
                assert_eq!(declarations.get("count"), Some(&json!(3)));
                assert!(matches!(body.as_ref(), Node::While { .. }));
            }
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn retry_desugars_to_attempt_loop_and_projection() {
        let composed = retry(2, function("{error: 'e'}")).unwrap();
        match composed.node() {
            Node::Let {
                declarations,
                body,
            } => {
                assert_eq!(declarations.get("count"), Some(&json!(2)));
                match body.as_ref() {
                    Node::Sequence { components } => {
                        assert!(components
                            .iter()
                            .any(|node| matches!(node, Node::While { .. })));
                        assert!(matches!(
                            components.last(),
                            Some(Node::Function { .. })
                        ));
                    }
                    other => panic!("expected sequence body, got {other:?}"),
                }
            }
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn retain_catch_desugars_to_wrapped_finally() {
        let composed = retain_with(literal(1), json!({"catch": true})).unwrap();
        match composed.node() {
            Node::Sequence { components } => {
                assert!(matches!(components[0], Node::Retain { .. }));
                assert!(matches!(components[1], Node::Function { .. }));
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn retain_filter_desugars_to_capture_and_field_retain() {
        let composed = retain_with(literal(1), json!({"filter": "{x: params.x}"})).unwrap();
        match composed.node() {
            Node::Sequence { components } => {
                assert!(matches!(components[0], Node::Function { .. }));
                match &components[1] {
                    Node::Retain { options, .. } => {
                        assert_eq!(options.get("field"), Some(&json!("filtered")));
                    }
                    other => panic!("expected retain, got {other:?}"),
                }
            }
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn ast_round_trips_through_annotation_form() {
        let composed = if_(
            function("params.value == true"),
            literal("yes"),
            literal("no"),
        )
        .unwrap();
        let encoded = composed.ast_value();
        assert_eq!(encoded["type"], json!("if"));
        let recovered = Composition::from_value(encoded).unwrap();
        assert_eq!(recovered.node(), composed.node());
    }

    #[test]
    fn from_value_rejects_invalid_code() {
        let bad = json!({"type": "function", "exec": {"kind": "expr:default", "code": "1 +"}});
        assert!(Composition::from_value(bad).is_err());
    }
}
