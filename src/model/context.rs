//! The live, mutable state threaded through execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::model::Learning;
use crate::stop::StopHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub project_root: PathBuf,
    pub run_dir: PathBuf,
    pub variables: HashMap<String, serde_json::Value>,
    pub stage_outputs: HashMap<String, serde_json::Value>,
    pub current_stage: Option<String>,
    pub recursion_count: u32,
    pub learnings: Vec<Learning>,
    pub started_at: DateTime<Utc>,
    pub env: HashMap<String, String>,
    /// Shared across every clone of this context (snapshots taken per
    /// parallel group included), so stopping through any of them reaches
    /// every subprocess in flight. Not part of the context's persisted
    /// identity, so it is skipped on (de)serialization.
    #[serde(skip, default)]
    pub stop: StopHandle,
}

impl Context {
    pub fn new(project_root: PathBuf, run_dir: PathBuf, variables: HashMap<String, serde_json::Value>) -> Self {
        Self {
            project_root,
            run_dir,
            variables,
            stage_outputs: HashMap::new(),
            current_stage: None,
            recursion_count: 0,
            learnings: Vec::new(),
            started_at: Utc::now(),
            env: HashMap::new(),
            stop: StopHandle::new(),
        }
    }

    pub fn record_output(&mut self, stage_id: &str, output: serde_json::Value) {
        self.stage_outputs.insert(stage_id.to_string(), output);
    }

    /// Builds the scope tree the template/expression evaluator walks:
    /// `{ variables: {...}, stages: {...} }`.
    pub fn as_scope(&self) -> serde_json::Value {
        serde_json::json!({
            "variables": self.variables,
            "stages": self.stage_outputs,
        })
    }

    /// Resolves a dotted path (`stages.foo.bar`, `variables.max_recursion`)
    /// against the scope tree. Bare top-level names fall back to variables
    /// for convenience (`max_recursion` == `variables.max_recursion`).
    pub fn resolve_path(&self, path: &str) -> Option<serde_json::Value> {
        let scope = self.as_scope();
        if let Some(value) = resolve_dotted(&scope, path) {
            return Some(value);
        }
        self.variables.get(path).cloned()
    }

    pub fn max_recursion(&self) -> u32 {
        self.variables
            .get("max_recursion")
            .and_then(|v| v.as_u64())
            .unwrap_or(3) as u32
    }

    /// SHA-256 over `{variables, stage-id list}`, used by the checkpoint
    /// store's `context_hash` field (spec §4.7).
    pub fn hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut stage_ids: Vec<&String> = self.stage_outputs.keys().collect();
        stage_ids.sort();
        let material = serde_json::json!({
            "variables": self.variables,
            "stage_ids": stage_ids,
        });
        let bytes = serde_json::to_vec(&material).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}

fn resolve_dotted(root: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        let mut ctx = Context::new(PathBuf::from("/proj"), PathBuf::from("/proj/.kiln/run-1"), HashMap::new());
        ctx.variables.insert("max_recursion".into(), serde_json::json!(2));
        ctx.record_output("X", serde_json::json!({"passed": true, "failed": false}));
        ctx
    }

    #[test]
    fn resolves_nested_stage_path() {
        let context = ctx();
        assert_eq!(context.resolve_path("stages.X.passed"), Some(serde_json::json!(true)));
    }

    #[test]
    fn resolves_variable_path() {
        let context = ctx();
        assert_eq!(context.resolve_path("variables.max_recursion"), Some(serde_json::json!(2)));
    }

    #[test]
    fn unresolved_path_is_none() {
        let context = ctx();
        assert_eq!(context.resolve_path("stages.ghost.passed"), None);
    }

    #[test]
    fn max_recursion_defaults_to_three() {
        let context = Context::new(PathBuf::from("/p"), PathBuf::from("/p/r"), HashMap::new());
        assert_eq!(context.max_recursion(), 3);
    }

    #[test]
    fn hash_changes_with_stage_outputs() {
        let mut context = Context::new(PathBuf::from("/p"), PathBuf::from("/p/r"), HashMap::new());
        let h1 = context.hash();
        context.record_output("a", serde_json::json!({"ok": true}));
        let h2 = context.hash();
        assert_ne!(h1, h2);
    }
}
