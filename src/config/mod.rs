//! Daemon configuration.
//!
//! Priority (highest to lowest): CLI / env var, TOML file, built-in default.
//! The policy section references template files on disk; their content is
//! read once at startup and pinned for the lifetime of the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::crawler::DEFAULT_CRAWL_BATCH;
use crate::github::DEFAULT_POLLING_TIME;
use crate::validate::Policy;

const DEFAULT_APPLICATION: &str = "repowarden";
const DEFAULT_SETTINGS_FILE: &str = "repositories.json";
const DEFAULT_LANGUAGE_VERSION: &str = "9.0";
const DEFAULT_NEUTRAL_LANGUAGE: &str = "en-US";

// ─── PolicyConfig ─────────────────────────────────────────────────────────────

/// Compliance policy (`[policy]` in config.toml).
///
/// File entries name templates relative to `templates_dir`; a file's basename
/// is the name checked for in the audited repositories.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Directory holding the template files below.
    pub templates_dir: PathBuf,
    /// Files required at the repository root, byte-compared to the template.
    pub mandatory_repository_files: Vec<String>,
    /// Files required next to every project file.
    pub mandatory_project_files: Vec<String>,
    /// Files that must not exist next to any project file.
    pub forbidden_project_files: Vec<String>,
    /// Lines every library repository's .gitignore must contain.
    pub mandatory_ignore_lines: Vec<String>,
    /// Projects every solution must contain and every sibling must depend on.
    pub mandatory_dependent_projects: Vec<String>,
    /// CI template for repositories whose main project is an executable.
    pub ci_executable_template: Option<String>,
    /// CI template for library repositories.
    pub ci_library_template: Option<String>,
    /// Required `<LangVersion>` (default: "9.0").
    pub language_version: String,
    /// Required `<NeutralLanguage>` (default: "en-US").
    pub neutral_language: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            mandatory_repository_files: Vec::new(),
            mandatory_project_files: Vec::new(),
            forbidden_project_files: Vec::new(),
            mandatory_ignore_lines: Vec::new(),
            mandatory_dependent_projects: Vec::new(),
            ci_executable_template: None,
            ci_library_template: None,
            language_version: DEFAULT_LANGUAGE_VERSION.to_string(),
            neutral_language: DEFAULT_NEUTRAL_LANGUAGE.to_string(),
        }
    }
}

impl PolicyConfig {
    /// Materialize the policy, reading every referenced template file.
    pub fn build(&self) -> Result<Policy> {
        let mut policy = Policy::new(&self.language_version, &self.neutral_language);

        for name in &self.mandatory_repository_files {
            policy.add_mandatory_repository_file(name, self.read_template(name)?);
        }
        for name in &self.mandatory_project_files {
            policy.add_mandatory_project_file(name, self.read_template(name)?);
        }
        for name in &self.forbidden_project_files {
            policy.add_forbidden_project_file(name);
        }
        for line in &self.mandatory_ignore_lines {
            policy.add_mandatory_ignore_line(line);
        }
        for name in &self.mandatory_dependent_projects {
            policy.add_mandatory_dependent_project(name);
        }

        match (&self.ci_executable_template, &self.ci_library_template) {
            (Some(executable), Some(library)) => policy.set_continuous_integration(
                self.read_template(executable)?,
                self.read_template(library)?,
            ),
            (None, None) => {}
            _ => bail!("ci_executable_template and ci_library_template must be set together"),
        }

        Ok(policy)
    }

    fn read_template(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.templates_dir.join(name);
        std::fs::read(&path).with_context(|| format!("reading template {}", path.display()))
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `config.toml` — all fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// GitHub account whose repositories are audited.
    owner: Option<String>,
    /// Personal access token. Prefer the REPOWARDEN_TOKEN env var.
    token: Option<String>,
    /// User-Agent product name sent to the API.
    application: Option<String>,
    /// Seconds between activity polling ticks (default: 20).
    polling_secs: Option<u64>,
    /// Repositories (re)processed per crawl pass (default: 3).
    crawl_batch: Option<usize>,
    /// Path of the persisted per-repository markers (default: repositories.json).
    settings_path: Option<PathBuf>,
    /// Log level filter string, e.g. "debug", "info,repowarden=trace" (default: "info").
    log: Option<String>,
    /// Override the GitHub API base URL (for testing against a stub).
    api_base_url: Option<String>,
    /// Compliance policy (`[policy]`).
    policy: Option<PolicyConfig>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(config) => Some(config),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── AuditConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub owner: String,
    pub token: String,
    /// User-Agent product name (default: "repowarden").
    pub application: String,
    pub polling: Duration,
    pub crawl_batch: usize,
    pub settings_path: PathBuf,
    pub log: String,
    /// None means the public GitHub API.
    pub api_base_url: Option<String>,
    pub policy: PolicyConfig,
}

impl AuditConfig {
    /// Build config from CLI/env args + optional TOML file. `owner` and
    /// `token` are required from one of the layers.
    pub fn new(
        config_path: Option<PathBuf>,
        owner: Option<String>,
        token: Option<String>,
        log: Option<String>,
    ) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(|| PathBuf::from("config.toml"));
        let toml = load_toml(&config_path).unwrap_or_default();

        let Some(owner) = owner.or(toml.owner) else {
            bail!("no owner configured: pass --owner or set `owner` in config.toml");
        };
        let Some(token) = token.or(toml.token) else {
            bail!("no token configured: set REPOWARDEN_TOKEN or `token` in config.toml");
        };

        Ok(Self {
            owner,
            token,
            application: toml
                .application
                .unwrap_or_else(|| DEFAULT_APPLICATION.to_string()),
            polling: toml
                .polling_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLLING_TIME),
            crawl_batch: toml.crawl_batch.unwrap_or(DEFAULT_CRAWL_BATCH),
            settings_path: toml
                .settings_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
            log: log.or(toml.log).unwrap_or_else(|| "info".to_string()),
            api_base_url: toml.api_base_url,
            policy: toml.policy.unwrap_or_default(),
        })
    }
}
