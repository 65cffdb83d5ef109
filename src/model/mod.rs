//! The audit graph: repositories, solutions, projects, and violations.
//!
//! Entities live in the [`AuditModel`] arena and point at each other through
//! typed indices, flattening the deep property-delegation chains of solution
//! tooling into value structs populated once at crawl time. Invalidation
//! propagates up the containment hierarchy: project → solution → repository.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Index of a repository within the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryIndex(pub usize);

/// Index of a solution within the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SolutionIndex(pub usize);

/// Index of a project within the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectIndex(pub usize);

// ── Project attribute enums ──────────────────────────────────────────────────

/// The format a project declares in the solution file.
///
/// Projects declaring a format newer than the known MSBuild format are
/// ignored by the crawl entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectFormat {
    Unknown,
    MsBuild,
    NewerThanMsBuild,
}

impl ProjectFormat {
    pub fn is_ignored(self) -> bool {
        matches!(self, ProjectFormat::NewerThanMsBuild)
    }
}

/// What the project builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    Unknown,
    Console,
    WinExe,
    Library,
}

impl OutputType {
    pub fn is_executable(self) -> bool {
        matches!(self, OutputType::Console | OutputType::WinExe)
    }
}

/// Project file style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdkType {
    Unknown,
    /// `<Project Sdk="...">` — the managed-SDK style the policy requires.
    Sdk,
    /// Legacy `<Project ToolsVersion="...">`.
    Legacy,
}

/// Nullable-annotation setting of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullableSetting {
    None,
    Enable,
    Warnings,
    Annotations,
}

// ── Entities ─────────────────────────────────────────────────────────────────

/// A package reference: (name, version, condition) tuple. Aggregated across
/// all projects for the cross-project consistency checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub name: String,
    pub version: String,
    pub condition: String,
}

/// A branch of a repository. Only the branch named "master"/"main" is
/// materialized into the repository head commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub private: bool,
    pub archived: bool,
    pub branches: Vec<Branch>,
    /// Head commit of the master/main branch, once enumerated.
    pub head_sha: Option<String>,
    /// Any non-test executable project exists — exempts the repository from
    /// the `.gitignore` checks.
    pub main_project_is_exe: bool,
    pub solutions: Vec<SolutionIndex>,
    /// Already (re)validated since the last detected change.
    pub checked: bool,
    pub valid: bool,
}

impl Repository {
    pub fn address(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub repository: RepositoryIndex,
    pub name: String,
    pub projects: Vec<ProjectIndex>,
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub solution: SolutionIndex,
    pub name: String,
    pub guid: String,
    pub relative_path: String,
    pub format: ProjectFormat,
    pub output_type: OutputType,
    pub sdk_type: SdkType,
    pub language_version: String,
    pub nullable: NullableSetting,
    pub neutral_language: String,
    pub editorconfig_linked: bool,
    pub warnings_as_errors: bool,
    pub package_references: Vec<PackageReference>,
    /// Project-reference names as declared in the project file.
    pub project_references: Vec<String>,
    /// Resolved references — always projects within the same solution.
    pub dependencies: Vec<ProjectIndex>,
    pub valid: bool,
}

// ── Violations ───────────────────────────────────────────────────────────────

/// A recorded policy non-compliance, scoped to a repository or to
/// cross-project package state. Never an error — violations are data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    Repository {
        repository_id: i64,
        repository: String,
        text: String,
    },
    Package {
        text: String,
    },
}

impl Violation {
    pub fn text(&self) -> &str {
        match self {
            Violation::Repository { text, .. } => text,
            Violation::Package { text } => text,
        }
    }
}

// ── Model ────────────────────────────────────────────────────────────────────

/// Arena holding the whole audit graph plus the aggregate violation list.
#[derive(Debug, Default)]
pub struct AuditModel {
    pub repositories: Vec<Repository>,
    pub solutions: Vec<Solution>,
    pub projects: Vec<Project>,
    pub violations: Vec<Violation>,
}

impl AuditModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything — the crawl was stopped.
    pub fn clear(&mut self) {
        self.repositories.clear();
        self.solutions.clear();
        self.projects.clear();
        self.violations.clear();
    }

    pub fn repository_index(&self, id: i64) -> Option<RepositoryIndex> {
        self.repositories
            .iter()
            .position(|repository| repository.id == id)
            .map(RepositoryIndex)
    }

    /// Record a violation unless an identical one is already present.
    /// Returns `true` when the violation was new.
    pub fn add_violation(&mut self, violation: Violation) -> bool {
        if self.violations.contains(&violation) {
            return false;
        }
        self.violations.push(violation);
        true
    }

    pub fn add_repository_violation(&mut self, repository: RepositoryIndex, text: impl Into<String>) {
        let entry = &self.repositories[repository.0];
        let violation = Violation::Repository {
            repository_id: entry.id,
            repository: entry.name.clone(),
            text: text.into(),
        };
        self.add_violation(violation);
    }

    pub fn add_package_violation(&mut self, text: impl Into<String>) {
        self.add_violation(Violation::Package { text: text.into() });
    }

    // ── Invalidation propagation ─────────────────────────────────────────────

    /// Invalidate a project and, transitively, its solution and repository.
    /// Idempotent: invalidating twice has the same visible effect as once.
    pub fn invalidate_project(&mut self, project: ProjectIndex) {
        self.projects[project.0].valid = false;
        let solution = self.projects[project.0].solution;
        self.invalidate_solution(solution);
    }

    pub fn invalidate_solution(&mut self, solution: SolutionIndex) {
        self.solutions[solution.0].valid = false;
        let repository = self.solutions[solution.0].repository;
        self.invalidate_repository(repository);
    }

    pub fn invalidate_repository(&mut self, repository: RepositoryIndex) {
        self.repositories[repository.0].valid = false;
    }

    // ── Activity-driven reset ────────────────────────────────────────────────

    /// React to detected pushes: drop every violation that is package-level
    /// or tied to one of the changed repositories, and reset those
    /// repositories to unchecked + valid with their branch data, solutions,
    /// and projects dropped. The head moved, so the next crawl must
    /// re-enumerate branches and re-parse the solutions before anything can
    /// be judged again.
    pub fn apply_activity(&mut self, changed: &[i64]) {
        let changed: HashSet<i64> = changed.iter().copied().collect();

        self.violations.retain(|violation| match violation {
            Violation::Package { .. } => false,
            Violation::Repository { repository_id, .. } => !changed.contains(repository_id),
        });

        let changed_repositories: HashSet<usize> = self
            .repositories
            .iter()
            .enumerate()
            .filter(|(_, repository)| changed.contains(&repository.id))
            .map(|(index, _)| index)
            .collect();
        if changed_repositories.is_empty() {
            return;
        }

        // Compact the solution and project arenas, remapping the indices the
        // surviving entities hold into them.
        let mut solution_map: Vec<Option<SolutionIndex>> = vec![None; self.solutions.len()];
        let mut solutions = Vec::with_capacity(self.solutions.len());
        for (index, solution) in self.solutions.drain(..).enumerate() {
            if !changed_repositories.contains(&solution.repository.0) {
                solution_map[index] = Some(SolutionIndex(solutions.len()));
                solutions.push(solution);
            }
        }

        let mut project_map: Vec<Option<ProjectIndex>> = vec![None; self.projects.len()];
        let mut projects = Vec::with_capacity(self.projects.len());
        for (index, mut project) in self.projects.drain(..).enumerate() {
            if let Some(solution) = solution_map[project.solution.0] {
                project.solution = solution;
                project_map[index] = Some(ProjectIndex(projects.len()));
                projects.push(project);
            }
        }

        for solution in &mut solutions {
            solution.projects = solution
                .projects
                .iter()
                .filter_map(|&project| project_map[project.0])
                .collect();
        }
        for project in &mut projects {
            project.dependencies = project
                .dependencies
                .iter()
                .filter_map(|&dependency| project_map[dependency.0])
                .collect();
        }

        self.solutions = solutions;
        self.projects = projects;

        for (index, repository) in self.repositories.iter_mut().enumerate() {
            if changed_repositories.contains(&index) {
                repository.checked = false;
                repository.valid = true;
                repository.head_sha = None;
                repository.branches.clear();
                repository.main_project_is_exe = false;
                repository.solutions.clear();
            } else {
                repository.solutions = repository
                    .solutions
                    .iter()
                    .filter_map(|&solution| solution_map[solution.0])
                    .collect();
            }
        }
    }
}
