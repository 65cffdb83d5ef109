//! Validation engine.
//!
//! Runs the compliance policy against the crawled model: repository-level
//! file checks, per-solution dependency checks, per-project quality checks,
//! and the cross-project package rules. Repositories that were validated
//! against their current head commit are tagged in settings and skipped on
//! later passes until activity moves the head.

pub mod packages;
pub mod policy;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::crawler::RepositoryCrawler;
use crate::github::{ActivityPoller, ActivityReport, GitHubError};
use crate::model::{
    AuditModel, NullableSetting, ProjectFormat, ProjectIndex, Repository, RepositoryIndex,
    SdkType, SolutionIndex,
};

pub use policy::{content_equal, CiTemplates, Policy, PolicyFile, CI_FILE_PATH, PREBUILD_PROJECT};

/// Where a finding should be recorded and what it invalidates.
enum Finding {
    Repository(String),
    Solution(SolutionIndex, String),
    Project(ProjectIndex, String),
}

/// Drives validation passes over the crawler's model.
pub struct ValidationEngine {
    crawler: Arc<RepositoryCrawler>,
    poller: Arc<ActivityPoller>,
    policy: Policy,
}

impl ValidationEngine {
    pub fn new(crawler: Arc<RepositoryCrawler>, poller: Arc<ActivityPoller>, policy: Policy) -> Self {
        Self { crawler, poller, policy }
    }

    pub fn crawler(&self) -> &Arc<RepositoryCrawler> {
        &self.crawler
    }

    /// Run one full validation pass over every unchecked repository, then
    /// the cross-project package rules, then tag repositories that came out
    /// valid so the next pass can skip them.
    pub async fn validate(&self) -> Result<(), GitHubError> {
        let repository_count = self.crawler.model().read().await.repositories.len();
        for index in 0..repository_count {
            self.validate_repository(RepositoryIndex(index)).await?;
        }

        {
            let mut model = self.crawler.model().write().await;
            packages::validate_reference_versions(&mut model);
            packages::validate_reference_conditions(&mut model);
        }

        self.tag_valid_repositories().await;
        Ok(())
    }

    /// React to detected pushes: stop the poller from racing the rewrite,
    /// drop stale cached content, reset the changed repositories to
    /// unchecked, then let polling continue.
    pub async fn on_activity(&self, report: &ActivityReport) {
        info!(changed = report.changed.len(), "activity detected, resetting affected repositories");
        self.poller.pause();
        self.crawler.cache().clear().await;
        self.crawler.model().write().await.apply_activity(&report.changed);
        self.poller.resume();
    }

    async fn validate_repository(&self, index: RepositoryIndex) -> Result<(), GitHubError> {
        let repository = {
            let model = self.crawler.model().read().await;
            model.repositories[index.0].clone()
        };

        if repository.checked {
            return Ok(());
        }
        if repository.solutions.is_empty() {
            // Nothing crawled for it yet; leave unchecked for a later pass.
            return Ok(());
        }
        if self.crawler.is_known_valid(&repository) {
            debug!(name = %repository.name, "head commit already validated");
            self.crawler.model().write().await.repositories[index.0].checked = true;
            return Ok(());
        }

        info!(name = %repository.name, "validating repository");
        let mut findings = Vec::new();
        self.check_repository_files(&repository, &mut findings).await?;
        self.check_project_files(index, &repository, &mut findings).await?;

        let mut model = self.crawler.model().write().await;
        check_solutions(&model, index, &self.policy.mandatory_dependent_projects, &mut findings);
        check_project_quality(&model, index, &self.policy, &mut findings);

        for finding in findings {
            match finding {
                Finding::Repository(text) => {
                    model.add_repository_violation(index, text);
                    model.invalidate_repository(index);
                }
                Finding::Solution(solution, text) => {
                    model.add_repository_violation(index, text);
                    model.invalidate_solution(solution);
                }
                Finding::Project(project, text) => {
                    model.add_repository_violation(index, text);
                    model.invalidate_project(project);
                }
            }
        }
        model.repositories[index.0].checked = true;

        Ok(())
    }

    // ── Repository-level checks ──────────────────────────────────────────────

    async fn check_repository_files(
        &self,
        repository: &Repository,
        findings: &mut Vec<Finding>,
    ) -> Result<(), GitHubError> {
        for file in &self.policy.mandatory_repository_files {
            let path = format!("/{}", file.name);
            match self.download(repository, &path).await? {
                None => findings.push(Finding::Repository(format!(
                    "In repo {}, file {} is missing",
                    repository.name, file.name
                ))),
                Some(content) if !content_equal(&content, &file.content) => {
                    findings.push(Finding::Repository(format!(
                        "In repo {}, file {} has invalid content",
                        repository.name, file.name
                    )))
                }
                Some(_) => {}
            }
        }

        // Service repositories manage their own ignore rules; only library
        // repositories are held to the shared .gitignore.
        if !repository.main_project_is_exe && !self.policy.mandatory_ignore_lines.is_empty() {
            match self.download(repository, "/.gitignore").await? {
                None => findings.push(Finding::Repository(format!(
                    "repo {} is missing a .gitignore",
                    repository.name
                ))),
                Some(content) => {
                    let missing = missing_ignore_lines(&content, &self.policy.mandatory_ignore_lines);
                    if missing > 0 {
                        findings.push(Finding::Repository(format!(
                            "repo {} is missing {missing} lines in .gitignore",
                            repository.name
                        )));
                    }
                }
            }
        }

        // Either template variant is acceptable regardless of what the
        // repository builds.
        if let Some(templates) = &self.policy.continuous_integration {
            match self.download(repository, CI_FILE_PATH).await? {
                None => findings.push(Finding::Repository(format!(
                    "In repo {}, continuous integration file is missing",
                    repository.name
                ))),
                Some(content)
                    if !content_equal(&content, &templates.executable)
                        && !content_equal(&content, &templates.library) =>
                {
                    findings.push(Finding::Repository(format!(
                        "In repo {}, continuous integration file has invalid content",
                        repository.name
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    // ── Project file checks (need downloads, so they run outside the lock) ──

    async fn check_project_files(
        &self,
        index: RepositoryIndex,
        repository: &Repository,
        findings: &mut Vec<Finding>,
    ) -> Result<(), GitHubError> {
        if self.policy.mandatory_project_files.is_empty()
            && self.policy.forbidden_project_files.is_empty()
        {
            return Ok(());
        }

        let projects: Vec<(ProjectIndex, String)> = {
            let model = self.crawler.model().read().await;
            model
                .repositories[index.0]
                .solutions
                .iter()
                .flat_map(|&solution| model.solutions[solution.0].projects.clone())
                .map(|project| (project, model.projects[project.0].relative_path.clone()))
                .collect()
        };

        for (project, relative_path) in projects {
            let directory = project_directory(&relative_path);

            for file in &self.policy.mandatory_project_files {
                let path = format!("/{directory}/{}", file.name);
                match self.download(repository, &path).await? {
                    None => findings.push(Finding::Project(
                        project,
                        format!("In repo {}, file {} is missing", repository.name, file.name),
                    )),
                    Some(content) if !content_equal(&content, &file.content) => {
                        findings.push(Finding::Project(
                            project,
                            format!(
                                "In repo {}, file {} has invalid content",
                                repository.name, file.name
                            ),
                        ))
                    }
                    Some(_) => {}
                }
            }

            for name in &self.policy.forbidden_project_files {
                let path = format!("/{directory}/{name}");
                if self.download(repository, &path).await?.is_some() {
                    findings.push(Finding::Project(
                        project,
                        format!("In repo {}, file {name} is present", repository.name),
                    ));
                }
            }
        }

        Ok(())
    }

    async fn download(
        &self,
        repository: &Repository,
        path: &str,
    ) -> Result<Option<Vec<u8>>, GitHubError> {
        self.crawler
            .cache()
            .download(&repository.owner, &repository.name, path)
            .await
    }

    // ── Tagging ──────────────────────────────────────────────────────────────

    /// Persist the verdict for repositories that survived the pass intact,
    /// keyed to their head commit.
    async fn tag_valid_repositories(&self) {
        let model = self.crawler.model().read().await;
        for repository in &model.repositories {
            if repository.checked && repository.valid {
                self.crawler.tag_valid_repository(repository);
            }
        }
    }
}

// ── Solution rules ────────────────────────────────────────────────────────────

/// Every solution must contain each mandatory project, and every other
/// project in the solution must reach it through the dependency graph.
fn check_solutions(
    model: &AuditModel,
    index: RepositoryIndex,
    mandatory_dependent_projects: &[String],
    findings: &mut Vec<Finding>,
) {
    for &solution_index in &model.repositories[index.0].solutions {
        let solution = &model.solutions[solution_index.0];
        let solution_name = &solution.name;
        let projects = &solution.projects;

        for mandatory in mandatory_dependent_projects {
            let Some(&target) = projects
                .iter()
                .find(|&&project| model.projects[project.0].name == *mandatory)
            else {
                findings.push(Finding::Solution(
                    solution_index,
                    format!("Solution {solution_name} is missing project {mandatory}"),
                ));
                continue;
            };

            for &project in projects {
                if project == target {
                    continue;
                }
                if !depends_on(model, project, target) {
                    let project_name = &model.projects[project.0].name;
                    findings.push(Finding::Project(
                        project,
                        format!(
                            "In solution {solution_name} project {project_name} should depend on {mandatory}"
                        ),
                    ));
                }
            }
        }
    }
}

/// Transitive reachability over resolved dependencies. The visited set makes
/// reference cycles terminate instead of recursing forever.
fn depends_on(model: &AuditModel, from: ProjectIndex, target: ProjectIndex) -> bool {
    let mut visited = HashSet::new();
    let mut pending = vec![from];
    while let Some(current) = pending.pop() {
        if !visited.insert(current) {
            continue;
        }
        for &dependency in &model.projects[current.0].dependencies {
            if dependency == target {
                return true;
            }
            pending.push(dependency);
        }
    }
    false
}

// ── Project quality rules ─────────────────────────────────────────────────────

fn check_project_quality(
    model: &AuditModel,
    index: RepositoryIndex,
    policy: &Policy,
    findings: &mut Vec<Finding>,
) {
    let projects: Vec<ProjectIndex> = model.repositories[index.0]
        .solutions
        .iter()
        .flat_map(|&solution| model.solutions[solution.0].projects.clone())
        .collect();

    for project_index in projects {
        let project = &model.projects[project_index.0];

        // Old-style projects in the classic solution format predate every
        // quality rule below; they are grandfathered in wholesale.
        if project.sdk_type == SdkType::Unknown && project.format == ProjectFormat::MsBuild {
            continue;
        }

        let name = project.name.clone();
        let mut push = |text: String| findings.push(Finding::Project(project_index, text));

        if project.sdk_type != SdkType::Sdk {
            push(format!("Project {name} has wrong SDK type"));
        }

        // The build-host helper only has to be an SDK project.
        if name == PREBUILD_PROJECT {
            continue;
        }

        if project.language_version != policy.language_version {
            push(format!(
                "Project {name} use wrong language version {}",
                project.language_version
            ));
        }
        // Any explicit setting counts; only a project silent on nullable
        // annotations is flagged.
        if project.nullable == NullableSetting::None {
            push(format!("Project {name} doesn't have nullable set"));
        }
        if project.neutral_language != policy.neutral_language {
            push(format!(
                "Project {name} use wrong neutral language {}",
                project.neutral_language
            ));
        }
        if !project.editorconfig_linked {
            push(format!("Project {name} doesn't have .editorconfig linked"));
        }
        if !project.warnings_as_errors {
            push(format!("Project {name} doesn't treat warnings as error"));
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Directory component of a project's solution-relative path, with MSBuild
/// backslashes normalized away.
fn project_directory(relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    match normalized.rfind('/') {
        Some(position) => normalized[..position].to_string(),
        None => String::new(),
    }
}

/// How many mandatory lines the downloaded .gitignore lacks.
fn missing_ignore_lines(content: &[u8], mandatory: &[String]) -> usize {
    let text = String::from_utf8_lossy(content);
    let present: HashSet<&str> = text.lines().map(|line| line.trim_end_matches('\r').trim()).collect();
    mandatory
        .iter()
        .filter(|line| !present.contains(line.trim()))
        .count()
}
