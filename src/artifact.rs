//! Deployable artifacts and the platform seam.
//!
//! A named composition deploys as a set of platform actions: the artifacts
//! its constructors attached (native sequences, file-backed actions) plus the
//! composition action itself, whose body embeds the compiled machine and
//! whose manifest carries the original AST under the `conductor` annotation.
//! The FaaS client stays outside the crate; callers hand in anything that
//! implements [`Platform`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::compile::compile;
use crate::compose::Composition;
use crate::error::{CompositionError, Result};

/// Annotation key under which the source AST is preserved.
pub const CONDUCTOR_ANNOTATION: &str = "conductor";

/// A platform action captured while building a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionArtifact {
    /// Fully qualified action name.
    pub name: String,
    /// Action body handed to the platform verbatim.
    pub action: Value,
}

/// Minimal action management surface of the hosting platform.
pub trait Platform {
    /// Error type surfaced by platform operations.
    type Error: std::fmt::Display;

    /// Delete an action. Deleting an absent action may fail; deployment
    /// ignores the failure.
    fn delete_action(&mut self, name: &str) -> std::result::Result<(), Self::Error>;

    /// Create or replace an action.
    fn update_action(&mut self, name: &str, action: &Value)
        -> std::result::Result<(), Self::Error>;
}

impl Composition {
    /// Build the deployable action for this composition: the compiled
    /// machine embedded as data plus the recovery annotation.
    pub fn conductor_artifact(&self) -> Result<ActionArtifact> {
        let name = self.name().ok_or(CompositionError::Unnamed)?;
        Ok(ActionArtifact {
            name: name.to_string(),
            action: json!({
                "exec": { "kind": "composition", "composition": compile(self) },
                "annotations": [
                    { "key": CONDUCTOR_ANNOTATION, "value": self.ast_value() },
                ],
            }),
        })
    }

    /// Deploy the composition and its captured artifacts, replacing any
    /// existing actions of the same names (delete, then update). Returns the
    /// number of successful updates; individual failures are logged and
    /// skipped so one broken artifact does not block the rest.
    pub fn deploy<P: Platform>(&self, platform: &mut P) -> Result<usize> {
        let conductor = self.conductor_artifact()?;
        if self
            .actions()
            .iter()
            .any(|artifact| artifact.name == conductor.name)
        {
            return Err(CompositionError::DuplicateArtifact(conductor.name));
        }

        let mut updated = 0;
        for artifact in self.actions().iter().chain(std::iter::once(&conductor)) {
            if let Err(err) = platform.delete_action(&artifact.name) {
                debug!(name = %artifact.name, error = %err, "delete skipped");
            }
            match platform.update_action(&artifact.name, &artifact.action) {
                Ok(()) => {
                    info!(name = %artifact.name, "action updated");
                    updated += 1;
                }
                Err(err) => {
                    warn!(name = %artifact.name, error = %err, "action update failed");
                }
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{action_with, literal, sequence};

    #[derive(Default)]
    struct MockPlatform {
        log: Vec<(String, String)>,
        existing: Vec<String>,
        fail_updates: Vec<String>,
    }

    impl Platform for MockPlatform {
        type Error = String;

        fn delete_action(&mut self, name: &str) -> std::result::Result<(), Self::Error> {
            self.log.push(("delete".into(), name.into()));
            if self.existing.iter().any(|existing| existing == name) {
                Ok(())
            } else {
                Err(format!("{name} not found"))
            }
        }

        fn update_action(
            &mut self,
            name: &str,
            _action: &Value,
        ) -> std::result::Result<(), Self::Error> {
            self.log.push(("update".into(), name.into()));
            if self.fail_updates.iter().any(|failing| failing == name) {
                Err("quota exceeded".into())
            } else {
                Ok(())
            }
        }
    }

    fn demo() -> Composition {
        sequence([
            action_with("all", serde_json::json!({"sequence": ["one", "two"]})).unwrap(),
            literal(1).unwrap(),
        ])
        .unwrap()
        .named("demo")
        .unwrap()
    }

    #[test]
    fn deploy_requires_a_name() {
        let unnamed = literal(1).unwrap();
        let mut platform = MockPlatform::default();
        assert!(matches!(
            unnamed.deploy(&mut platform),
            Err(CompositionError::Unnamed)
        ));
    }

    #[test]
    fn deploy_deletes_then_updates_each_artifact_in_order() {
        let mut platform = MockPlatform::default();
        let updated = demo().deploy(&mut platform).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(
            platform.log,
            vec![
                ("delete".to_string(), "/_/all".to_string()),
                ("update".to_string(), "/_/all".to_string()),
                ("delete".to_string(), "/_/demo".to_string()),
                ("update".to_string(), "/_/demo".to_string()),
            ]
        );
    }

    #[test]
    fn failed_updates_are_skipped_not_fatal() {
        let mut platform = MockPlatform {
            fail_updates: vec!["/_/all".into()],
            ..MockPlatform::default()
        };
        let updated = demo().deploy(&mut platform).unwrap();
        assert_eq!(updated, 1);
    }

    #[test]
    fn annotation_recovers_the_source_composition() {
        let composed = demo();
        let artifact = composed.conductor_artifact().unwrap();
        let annotation = artifact.action["annotations"][0].clone();
        assert_eq!(annotation["key"], serde_json::json!(CONDUCTOR_ANNOTATION));
        let recovered = Composition::from_value(annotation["value"].clone()).unwrap();
        assert_eq!(recovered.node(), composed.node());
    }

    #[test]
    fn composition_name_may_not_shadow_an_artifact() {
        let clashing = action_with("demo", serde_json::json!({"sequence": ["one"]}))
            .unwrap()
            .named("demo")
            .unwrap();
        let mut platform = MockPlatform::default();
        assert!(matches!(
            clashing.deploy(&mut platform),
            Err(CompositionError::DuplicateArtifact(_))
        ));
    }
}
