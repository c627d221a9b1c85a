//! Project-level configuration (spec §6): a `kiln.toml` file loaded from
//! the project root, supplying the defaults a factory document's own
//! `config` blocks override. Missing file is not an error — the core
//! falls back to hardcoded defaults, matching the teacher's
//! `forge_config.rs` layering of file → environment → built-in default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `[defaults]` table: the fallback values a stage's own `config` block
/// overrides when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_max_recursion")]
    pub max_recursion: u32,
    #[serde(default = "default_parallel")]
    pub parallel: u32,
}

fn default_iterations() -> u32 {
    5
}
fn default_timeout_ms() -> u64 {
    0
}
fn default_max_recursion() -> u32 {
    3
}
fn default_parallel() -> u32 {
    1
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            timeout_ms: default_timeout_ms(),
            retries: 0,
            max_recursion: default_max_recursion(),
            parallel: default_parallel(),
        }
    }
}

/// `[agents]` table: the same role→identifier mapping a factory document
/// carries in its own `agents` block, consulted when a factory omits an
/// explicit assignment for a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsSection {
    #[serde(default)]
    pub prd: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnToml {
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub agents: AgentsSection,
}

impl KilnToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).context("failed to parse kiln.toml")
    }

    /// **LoadOrDefault(projectRoot).** `kiln.toml` at the project root;
    /// absence is not an error.
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let path = project_root.join("kiln.toml");
        if path.is_file() { Self::load(&path) } else { Ok(Self::default()) }
    }
}

/// Runtime configuration: the parsed file plus the environment-variable
/// fallback layer the reference project consults beneath it.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub toml: KilnToml,
    pub fsm_mode: bool,
}

impl Config {
    pub fn load(project_root: &Path) -> Result<Self> {
        let project_root = project_root
            .canonicalize()
            .context("failed to resolve project directory")?;
        let toml = KilnToml::load_or_default(&project_root)?;
        let fsm_mode = std::env::var("RALPH_FACTORY_FSM").is_ok();
        Ok(Self { project_root, toml, fsm_mode })
    }

    /// `RALPH_ROOT` overrides the resolved project root for subprocess
    /// invocations that expect to find it in their own environment.
    pub fn ralph_root(&self) -> PathBuf {
        std::env::var("RALPH_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.project_root.clone())
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.toml.defaults.timeout_ms
    }

    pub fn default_max_recursion(&self) -> u32 {
        self.toml.defaults.max_recursion
    }

    pub fn agent_for_role(&self, role: &str) -> Option<String> {
        match role {
            "prd" => self.toml.agents.prd.clone(),
            "plan" => self.toml.agents.plan.clone(),
            "build" => self.toml.agents.build.clone(),
            _ => None,
        }
    }
}
