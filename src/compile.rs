//! Lowering from the composition AST to the flat state machine.
//!
//! Each node compiles to a block of states whose single fall-through exit is
//! the block's last state, left without a `next` offset. [`chain`] links two
//! blocks by pointing the first block's exit one state forward; enclosing
//! nodes then patch branch offsets relative to the emitting state. The
//! compiler is deterministic and visits every node exactly once; all jumps it
//! emits land inside the machine.

use serde_json::Value;

use crate::compose::{Composition, Node};
use crate::fsm::State;

/// Compile a composition to its state machine.
pub fn compile(composition: &Composition) -> Vec<State> {
    compile_node(composition.node())
}

fn compile_node(node: &Node) -> Vec<State> {
    match node {
        Node::Sequence { components } => {
            if components.is_empty() {
                return vec![State::Pass { next: None }];
            }
            let mut fsm = Vec::new();
            for component in components {
                fsm = chain(fsm, compile_node(component));
            }
            fsm
        }
        Node::Action { name } => vec![State::Action {
            name: name.clone(),
            next: None,
        }],
        Node::Function { exec } => vec![State::Function {
            exec: exec.clone(),
            next: None,
        }],
        Node::Literal { value } => vec![State::Literal {
            value: value.clone(),
            next: None,
        }],
        Node::If {
            test,
            consequent,
            alternate,
            options,
        } => {
            let nosave = nosave(options);
            let mut consequent = branch_block(consequent, nosave);
            let mut alternate = branch_block(alternate, nosave);

            let mut fsm = Vec::new();
            if !nosave {
                fsm.push(State::Push {
                    field: None,
                    next: None,
                });
            }
            fsm = chain(fsm, compile_node(test));
            fsm = chain(
                fsm,
                vec![State::Choice {
                    then: 1,
                    r#else: consequent.len() as i64 + 1,
                }],
            );
            // The consequent exits over the alternate to the shared pass.
            if let Some(last) = consequent.last_mut() {
                last.link(alternate.len() as i64 + 1);
            }
            fsm.extend(consequent);
            if let Some(last) = alternate.last_mut() {
                last.link(1);
            }
            fsm.extend(alternate);
            fsm.push(State::Pass { next: None });
            fsm
        }
        Node::While {
            test,
            body,
            options,
        } => {
            let nosave = nosave(options);
            let mut body = branch_block(body, nosave);

            let mut fsm = Vec::new();
            if !nosave {
                fsm.push(State::Push {
                    field: None,
                    next: None,
                });
            }
            fsm = chain(fsm, compile_node(test));
            fsm = chain(
                fsm,
                vec![State::Choice {
                    then: 1,
                    r#else: body.len() as i64 + 1,
                }],
            );
            // The body's exit loops back to the top of the block.
            let last_index = fsm.len() + body.len() - 1;
            if let Some(last) = body.last_mut() {
                last.link(-(last_index as i64));
            }
            fsm.extend(body);
            if !nosave {
                fsm.push(State::Pop {
                    collect: false,
                    next: Some(1),
                });
            }
            fsm.push(State::Pass { next: None });
            fsm
        }
        Node::Try { body, handler } => {
            let mut fsm = chain(
                vec![State::Try {
                    catch: 0,
                    next: None,
                }],
                compile_node(body),
            );
            fsm = chain(fsm, vec![State::Exit { next: None }]);
            let catch = fsm.len() as i64;
            if let State::Try { catch: slot, .. } = &mut fsm[0] {
                *slot = catch;
            }
            // The success-path exit unwinds the try frame and skips the handler.
            let mut handler = compile_node(handler);
            let exit_index = fsm.len() - 1;
            let pass_index = fsm.len() + handler.len();
            fsm[exit_index].link((pass_index - exit_index) as i64);
            if let Some(last) = handler.last_mut() {
                last.link(1);
            }
            fsm.extend(handler);
            fsm.push(State::Pass { next: None });
            fsm
        }
        Node::Finally { body, finalizer } => {
            let mut fsm = chain(
                vec![State::Try {
                    catch: 0,
                    next: None,
                }],
                compile_node(body),
            );
            fsm = chain(fsm, vec![State::Exit { next: None }]);
            let catch = fsm.len() as i64;
            if let State::Try { catch: slot, .. } = &mut fsm[0] {
                *slot = catch;
            }
            chain(fsm, compile_node(finalizer))
        }
        Node::Let { declarations, body } => {
            let fsm = chain(
                vec![State::Let {
                    r#let: declarations.clone(),
                    next: None,
                }],
                compile_node(body),
            );
            chain(fsm, vec![State::Exit { next: None }])
        }
        Node::Retain { body, options } => {
            let field = options
                .get("field")
                .and_then(Value::as_str)
                .map(str::to_string);
            let fsm = chain(
                vec![State::Push { field, next: None }],
                compile_node(body),
            );
            chain(
                fsm,
                vec![State::Pop {
                    collect: true,
                    next: None,
                }],
            )
        }
    }
}

/// Link two blocks: the first block's exit falls through to the second.
fn chain(mut first: Vec<State>, second: Vec<State>) -> Vec<State> {
    if second.is_empty() {
        return first;
    }
    if let Some(last) = first.last_mut() {
        last.link(1);
    }
    first.extend(second);
    first
}

/// Compile an `if`/`while` branch, restoring the saved `params` on entry
/// unless the construct runs in `nosave` mode.
fn branch_block(node: &Node, nosave: bool) -> Vec<State> {
    let mut block = Vec::new();
    if !nosave {
        block.push(State::Pop {
            collect: false,
            next: None,
        });
    }
    chain(block, compile_node(node))
}

fn nosave(options: &serde_json::Map<String, Value>) -> bool {
    options.get("nosave") == Some(&Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{
        function, if_, let_, literal, retain, retry, sequence, task, try_, while_,
    };
    use crate::fsm::{validate_offsets, Exec};
    use serde_json::json;

    #[test]
    fn empty_sequence_compiles_to_a_single_pass() {
        let fsm = compile(&task(()).unwrap());
        assert_eq!(fsm, vec![State::Pass { next: None }]);
    }

    #[test]
    fn sequences_chain_with_unit_offsets() {
        let composed = sequence([literal(json!({"x": 1})), function("{x: params.x + 1}")]).unwrap();
        let fsm = compile(&composed);
        assert_eq!(
            fsm,
            vec![
                State::Literal {
                    value: json!({"x": 1}),
                    next: Some(1),
                },
                State::Function {
                    exec: Exec::expr("{x: params.x + 1}"),
                    next: None,
                },
            ]
        );
    }

    #[test]
    fn if_saves_and_restores_params_around_the_test() {
        let composed = if_(literal(1), literal("yes"), literal("no")).unwrap();
        let fsm = compile(&composed);
        assert_eq!(
            fsm,
            vec![
                State::Push { field: None, next: Some(1) },
                State::Literal { value: json!(1), next: Some(1) },
                State::Choice { then: 1, r#else: 3 },
                State::Pop { collect: false, next: Some(1) },
                State::Literal { value: json!("yes"), next: Some(3) },
                State::Pop { collect: false, next: Some(1) },
                State::Literal { value: json!("no"), next: Some(1) },
                State::Pass { next: None },
            ]
        );
        validate_offsets(&fsm).unwrap();
    }

    #[test]
    fn while_loops_back_to_the_top_of_its_block() {
        let composed = while_(function("false"), literal(1)).unwrap();
        let fsm = compile(&composed);
        assert_eq!(
            fsm,
            vec![
                State::Push { field: None, next: Some(1) },
                State::Function { exec: Exec::expr("false"), next: Some(1) },
                State::Choice { then: 1, r#else: 3 },
                State::Pop { collect: false, next: Some(1) },
                State::Literal { value: json!(1), next: Some(-4) },
                State::Pop { collect: false, next: Some(1) },
                State::Pass { next: None },
            ]
        );
        validate_offsets(&fsm).unwrap();
    }

    #[test]
    fn nosave_branches_skip_the_push_pop_pair() {
        let composed = crate::compose::while_with(
            function("false"),
            literal(1),
            json!({"nosave": true}),
        )
        .unwrap();
        let fsm = compile(&composed);
        assert!(fsm
            .iter()
            .all(|state| !matches!(state, State::Push { .. } | State::Pop { .. })));
    }

    #[test]
    fn try_pairs_the_frame_with_a_success_path_exit() {
        let composed = try_(literal(1), literal("handled")).unwrap();
        let fsm = compile(&composed);
        assert_eq!(
            fsm,
            vec![
                State::Try { catch: 3, next: Some(1) },
                State::Literal { value: json!(1), next: Some(1) },
                State::Exit { next: Some(2) },
                State::Literal { value: json!("handled"), next: Some(1) },
                State::Pass { next: None },
            ]
        );
        validate_offsets(&fsm).unwrap();
    }

    #[test]
    fn finally_runs_the_finalizer_on_both_paths() {
        let composed = crate::compose::finally(literal(1), literal("done")).unwrap();
        let fsm = compile(&composed);
        assert_eq!(
            fsm,
            vec![
                State::Try { catch: 3, next: Some(1) },
                State::Literal { value: json!(1), next: Some(1) },
                State::Exit { next: Some(1) },
                State::Literal { value: json!("done"), next: None },
            ]
        );
        validate_offsets(&fsm).unwrap();
    }

    #[test]
    fn let_scopes_close_with_an_exit() {
        let composed = let_(json!({"count": 3}), literal(1)).unwrap();
        let fsm = compile(&composed);
        assert!(matches!(fsm[0], State::Let { .. }));
        assert!(matches!(fsm.last(), Some(State::Exit { next: None })));
        validate_offsets(&fsm).unwrap();
    }

    #[test]
    fn retain_brackets_the_body_with_push_and_collecting_pop() {
        let composed = retain(literal(json!({"y": 2}))).unwrap();
        let fsm = compile(&composed);
        assert_eq!(
            fsm,
            vec![
                State::Push { field: None, next: Some(1) },
                State::Literal { value: json!({"y": 2}), next: Some(1) },
                State::Pop { collect: true, next: None },
            ]
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let build = || retry(2, function("{error: 'e'}")).unwrap();
        assert_eq!(compile(&build()), compile(&build()));
    }

    #[test]
    fn compiled_sugar_stays_in_range() {
        for composed in [
            retry(3, sequence(["a", "b"])).unwrap(),
            crate::compose::repeat(4, literal(json!({}))).unwrap(),
            crate::compose::retain_with(literal(1), json!({"filter": "{x: params.x}"})).unwrap(),
        ] {
            validate_offsets(&compile(&composed)).unwrap();
        }
    }
}
