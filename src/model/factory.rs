//! Factory: a named, declarative pipeline of stages.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::errors::FactoryError;
use crate::model::stage::{Stage, is_valid_stage_id};

/// Agent role assignments: a logical role (`"prd"`, `"plan"`, `"build"`, ...)
/// maps to an agent identifier, with `default` as the fallback for any role
/// that has no explicit assignment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentRoles {
    #[serde(default = "default_agent")]
    pub default: String,
    #[serde(flatten)]
    pub roles: HashMap<String, String>,
}

fn default_agent() -> String {
    "default".to_string()
}

impl AgentRoles {
    pub fn resolve(&self, role: &str) -> &str {
        self.roles.get(role).map(|s| s.as_str()).unwrap_or(&self.default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factory {
    #[serde(default = "default_version")]
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub agents: AgentRoles,
    pub stages: Vec<Stage>,
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Factory {
    /// Validates the invariants stated in spec §3 and the rule list in
    /// §4.1, independent of graph cycle detection (which the scheduler
    /// performs once it has built the dependency graph).
    pub fn validate(&self) -> Result<Vec<String>, FactoryError> {
        let mut warnings = Vec::new();

        if self.stages.is_empty() {
            return Err(FactoryError::EmptyStages);
        }

        if self.version != "1" {
            warnings.push(format!(
                "unknown schema version '{}'; proceeding as version 1",
                self.version
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                return Err(FactoryError::DuplicateStage(stage.id.clone()));
            }
            if !is_valid_stage_id(&stage.id) {
                return Err(FactoryError::InvalidStageId(stage.id.clone()));
            }
        }

        let ids: HashSet<&str> = self.stages.iter().map(|s| s.id.as_str()).collect();
        let index_of: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        for (i, stage) in self.stages.iter().enumerate() {
            match stage.kind {
                crate::model::StageType::Custom if stage.command.is_none() => {
                    return Err(FactoryError::MissingCommand(stage.id.clone()));
                }
                crate::model::StageType::Factory if stage.factory.is_none() => {
                    return Err(FactoryError::MissingFactoryName(stage.id.clone()));
                }
                _ => {}
            }

            for dep in &stage.depends_on {
                if dep == &stage.id {
                    return Err(FactoryError::SelfDependency(stage.id.clone()));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(FactoryError::UnknownDependency {
                        stage: stage.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            if let Some(target) = &stage.loop_to {
                match index_of.get(target.as_str()) {
                    None => {
                        return Err(FactoryError::InvalidLoopTarget {
                            stage: stage.id.clone(),
                            target: target.clone(),
                        });
                    }
                    Some(&target_idx) if target_idx >= i => {
                        return Err(FactoryError::InvalidLoopTarget {
                            stage: stage.id.clone(),
                            target: target.clone(),
                        });
                    }
                    _ => {}
                }
            }

            stage.config.validate(&stage.id)?;
        }

        Ok(warnings)
    }

    pub fn get_stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stage::{Stage, StageType};

    fn stage(id: &str, kind: StageType, deps: &[&str]) -> Stage {
        Stage::new(id, kind).with_depends_on(deps.iter().map(|s| s.to_string()).collect())
    }

    fn base_factory(stages: Vec<Stage>) -> Factory {
        Factory {
            version: "1".into(),
            name: "demo".into(),
            variables: HashMap::new(),
            agents: AgentRoles::default(),
            stages,
            source_path: None,
        }
    }

    #[test]
    fn rejects_empty_stage_list() {
        let f = base_factory(vec![]);
        assert!(matches!(f.validate(), Err(FactoryError::EmptyStages)));
    }

    #[test]
    fn rejects_duplicate_stage_ids() {
        let f = base_factory(vec![
            stage("a", StageType::Custom, &[]).with_command("true"),
            stage("a", StageType::Custom, &[]).with_command("true"),
        ]);
        assert!(matches!(f.validate(), Err(FactoryError::DuplicateStage(_))));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let f = base_factory(vec![stage("a", StageType::Custom, &["ghost"]).with_command("true")]);
        assert!(matches!(
            f.validate(),
            Err(FactoryError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn rejects_self_dependency() {
        let f = base_factory(vec![stage("a", StageType::Custom, &["a"]).with_command("true")]);
        assert!(matches!(f.validate(), Err(FactoryError::SelfDependency(_))));
    }

    #[test]
    fn custom_stage_requires_command() {
        let f = base_factory(vec![stage("a", StageType::Custom, &[])]);
        assert!(matches!(f.validate(), Err(FactoryError::MissingCommand(_))));
    }

    #[test]
    fn factory_stage_requires_factory_name() {
        let f = base_factory(vec![stage("a", StageType::Factory, &[])]);
        assert!(matches!(
            f.validate(),
            Err(FactoryError::MissingFactoryName(_))
        ));
    }

    #[test]
    fn loop_to_must_reference_earlier_stage() {
        let mut later = stage("a", StageType::Custom, &[]).with_command("true");
        later.loop_to = Some("b".into());
        let f = base_factory(vec![later, stage("b", StageType::Custom, &[]).with_command("true")]);
        assert!(matches!(
            f.validate(),
            Err(FactoryError::InvalidLoopTarget { .. })
        ));
    }

    #[test]
    fn loop_to_earlier_stage_is_accepted() {
        let mut second = stage("b", StageType::Custom, &["a"]).with_command("true");
        second.loop_to = Some("a".into());
        let f = base_factory(vec![
            stage("a", StageType::Custom, &[]).with_command("true"),
            second,
        ]);
        assert!(f.validate().is_ok());
    }

    #[test]
    fn unknown_version_produces_warning_not_error() {
        let mut f = base_factory(vec![stage("a", StageType::Custom, &[]).with_command("true")]);
        f.version = "9".into();
        let warnings = f.validate().unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn agent_roles_resolve_falls_back_to_default() {
        let roles = AgentRoles {
            default: "claude".into(),
            roles: HashMap::from([("plan".to_string(), "gpt".to_string())]),
        };
        assert_eq!(roles.resolve("plan"), "gpt");
        assert_eq!(roles.resolve("build"), "claude");
    }
}
