//! Repository crawler.
//!
//! Enumerates the owner's repositories, selects which to (re)process using
//! the oldest-first policy, materializes branches/solutions/projects into
//! the audit model, and resolves the per-solution project dependency graph.
//! Persisted last-checked markers keep coverage fair under quota pressure:
//! repositories are never starved by always re-checking the same subset.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::github::api::RemoteRepository;
use crate::github::{Connection, DownloadCache, GitHubError};
use crate::model::{
    AuditModel, Branch, Project, ProjectIndex, Repository, RepositoryIndex, Solution, SolutionIndex,
};
use crate::settings::SettingsStore;
use crate::solution::{ProjectDetails, SolutionModel};

/// How many repositories one enumeration pass processes.
pub const DEFAULT_CRAWL_BATCH: usize = 3;

/// Crawls repositories into the shared [`AuditModel`].
pub struct RepositoryCrawler {
    connection: Arc<Connection>,
    cache: Arc<DownloadCache>,
    settings: Arc<dyn SettingsStore>,
    solution_model: Arc<dyn SolutionModel>,
    model: Arc<RwLock<AuditModel>>,
    owner: String,
    crawl_batch: usize,
}

impl RepositoryCrawler {
    pub fn new(
        connection: Arc<Connection>,
        cache: Arc<DownloadCache>,
        settings: Arc<dyn SettingsStore>,
        solution_model: Arc<dyn SolutionModel>,
        owner: impl Into<String>,
        crawl_batch: usize,
    ) -> Self {
        Self {
            connection,
            cache,
            settings,
            solution_model,
            model: Arc::new(RwLock::new(AuditModel::new())),
            owner: owner.into(),
            crawl_batch,
        }
    }

    pub fn model(&self) -> &Arc<RwLock<AuditModel>> {
        &self.model
    }

    pub fn cache(&self) -> &Arc<DownloadCache> {
        &self.cache
    }

    /// Run one full crawl: enumerate repositories, branches, and solutions.
    /// Returns `Ok(false)` when the connection could not be established.
    pub async fn start(&self) -> Result<bool, GitHubError> {
        if !self.connection.connect().await? {
            return Ok(false);
        }

        self.enumerate_repositories().await?;
        self.enumerate_branches().await?;
        self.enumerate_solutions().await?;

        Ok(true)
    }

    /// Clear all collections.
    pub async fn stop(&self) {
        self.model.write().await.clear();
    }

    /// Select up to `crawl_batch` repositories oldest-first and add them to
    /// the model (repositories already present are kept and skipped).
    pub async fn enumerate_repositories(&self) -> Result<(), GitHubError> {
        let found = self
            .connection
            .api()
            .search_repositories(&self.owner, None)
            .await?;

        let mut never_processed: VecDeque<RemoteRepository> = VecDeque::new();
        let mut processed: Vec<(RemoteRepository, DateTime<Utc>)> = Vec::new();

        {
            let model = self.model.read().await;
            for repository in found {
                if repository.archived {
                    continue;
                }
                if model.repository_index(repository.id).is_some() {
                    continue;
                }
                match self.last_checked(&repository.name) {
                    Some(marker) => processed.push((repository, marker)),
                    None => never_processed.push_back(repository),
                }
            }
        }

        let mut selected = Vec::new();
        for _ in 0..self.crawl_batch {
            // Never-processed first (FIFO), then the stalest marker.
            if let Some(repository) = never_processed.pop_front() {
                selected.push(repository);
            } else if let Some(oldest) = processed
                .iter()
                .enumerate()
                .min_by_key(|(_, (_, marker))| *marker)
                .map(|(position, _)| position)
            {
                selected.push(processed.remove(oldest).0);
            } else {
                break;
            }
        }

        let mut model = self.model.write().await;
        for repository in selected {
            info!(name = %repository.name, id = repository.id, "crawling repository");
            model.repositories.push(Repository {
                id: repository.id,
                owner: repository.owner,
                name: repository.name,
                private: repository.private,
                archived: repository.archived,
                branches: Vec::new(),
                head_sha: None,
                main_project_is_exe: false,
                solutions: Vec::new(),
                checked: false,
                valid: true,
            });
        }

        Ok(())
    }

    /// Enumerate branches per repository. The first branch named "master" or
    /// "main" becomes the head commit; branches after it are not inspected.
    pub async fn enumerate_branches(&self) -> Result<(), GitHubError> {
        let targets: Vec<(usize, String, String)> = {
            let model = self.model.read().await;
            model
                .repositories
                .iter()
                .enumerate()
                .filter(|(_, repository)| repository.head_sha.is_none())
                .map(|(index, repository)| (index, repository.owner.clone(), repository.name.clone()))
                .collect()
        };

        for (index, owner, name) in targets {
            if !self.connection.connect().await? {
                return Ok(());
            }
            let branches = self.connection.api().list_branches(&owner, &name).await?;

            let mut model = self.model.write().await;
            let repository = &mut model.repositories[index];
            for branch in branches {
                let is_head = branch.name == "master" || branch.name == "main";
                repository.branches.push(Branch {
                    name: branch.name,
                    commit_sha: branch.commit_sha.clone(),
                });
                if is_head {
                    repository.head_sha = Some(branch.commit_sha);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Find solution files in each repository, parse them, download and
    /// parse every non-ignored project, and resolve dependencies.
    pub async fn enumerate_solutions(&self) -> Result<(), GitHubError> {
        let repository_count = self.model.read().await.repositories.len();

        for index in 0..repository_count {
            let (owner, name, already_loaded) = {
                let model = self.model.read().await;
                let repository = &model.repositories[index];
                (repository.owner.clone(), repository.name.clone(), !repository.solutions.is_empty())
            };
            if already_loaded {
                continue;
            }

            let solution_files = self.search_and_download(&owner, &name, "/", ".sln").await?;
            let mut main_project_is_exe = false;

            for (file_name, content) in solution_files {
                let Some(content) = content else { continue };
                let solution_name = file_name.strip_suffix(".sln").unwrap_or(&file_name).to_string();
                let text = String::from_utf8_lossy(&content);
                let descriptor = self.solution_model.parse_solution(&solution_name, &text);

                // Download + parse non-ignored projects before touching the
                // model, so the write lock is not held across the network.
                let mut loaded = Vec::new();
                for project in descriptor.projects {
                    if project.format.is_ignored() {
                        debug!(project = %project.name, "ignoring non-MSBuild project");
                        continue;
                    }

                    let details = match self.cache.download(&owner, &name, &project.relative_path).await? {
                        Some(bytes) => self.solution_model.parse_project(&bytes),
                        None => {
                            warn!(project = %project.name, path = %project.relative_path, "project file absent");
                            ProjectDetails::default()
                        }
                    };
                    loaded.push((project, details));
                }

                if loaded.is_empty() {
                    continue;
                }

                let mut model = self.model.write().await;
                let solution_index = SolutionIndex(model.solutions.len());
                let mut project_indices = Vec::new();

                for (descriptor, details) in loaded {
                    let project_index = ProjectIndex(model.projects.len());
                    let mut references = descriptor.project_references;
                    for reference in details.project_references {
                        if !references.contains(&reference) {
                            references.push(reference);
                        }
                    }
                    model.projects.push(Project {
                        solution: solution_index,
                        name: descriptor.name,
                        guid: descriptor.guid,
                        relative_path: descriptor.relative_path,
                        format: descriptor.format,
                        output_type: details.output_type,
                        sdk_type: details.sdk_type,
                        language_version: details.language_version,
                        nullable: details.nullable,
                        neutral_language: details.neutral_language,
                        editorconfig_linked: details.editorconfig_linked,
                        warnings_as_errors: details.warnings_as_errors,
                        package_references: details.package_references,
                        project_references: references,
                        dependencies: Vec::new(),
                        valid: true,
                    });
                    project_indices.push(project_index);
                }

                model.solutions.push(Solution {
                    repository: RepositoryIndex(index),
                    name: solution_name,
                    projects: project_indices.clone(),
                    valid: true,
                });
                model.repositories[index].solutions.push(solution_index);

                resolve_dependencies(&mut model, &project_indices);
                main_project_is_exe |= has_main_executable(&model, &project_indices);
            }

            self.model.write().await.repositories[index].main_project_is_exe = main_project_is_exe;
        }

        Ok(())
    }

    /// Search for files by path + pattern and download each hit.
    /// Missing files are normal absences and come back as `None`.
    async fn search_and_download(
        &self,
        owner: &str,
        name: &str,
        path: &str,
        pattern: &str,
    ) -> Result<Vec<(String, Option<Vec<u8>>)>, GitHubError> {
        if !self.connection.connect().await? {
            return Ok(Vec::new());
        }

        debug!(%owner, %name, %path, %pattern, "searching repository files");
        let hits = self.connection.api().search_code(owner, name, path, pattern).await?;

        let mut results = Vec::new();
        for hit in hits {
            let content = self.cache.download(owner, name, &hit.path).await?;
            results.push((hit.name, content));
        }
        Ok(results)
    }

    // ── Persisted markers ────────────────────────────────────────────────────

    /// Last-checked marker for a repository, if it was ever processed.
    pub fn last_checked(&self, repository_name: &str) -> Option<DateTime<Utc>> {
        self.settings
            .get(repository_name)
            .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
            .map(|value| value.with_timezone(&Utc))
    }

    /// Persist "validated now" plus the head commit the verdict applies to,
    /// so future passes can skip a repository that has not moved.
    pub fn tag_valid_repository(&self, repository: &Repository) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.settings.set(&repository.name, &now);
        if let Some(sha) = &repository.head_sha {
            self.settings.set(&valid_sha_key(&repository.name), sha);
        }
    }

    /// A repository is known valid when its persisted known-valid commit
    /// matches its current head.
    pub fn is_known_valid(&self, repository: &Repository) -> bool {
        match (&repository.head_sha, self.settings.get(&valid_sha_key(&repository.name))) {
            (Some(head), Some(tagged)) => *head == tagged,
            _ => false,
        }
    }
}

fn valid_sha_key(repository_name: &str) -> String {
    format!("{repository_name}/valid-sha")
}

/// Resolve each project's declared references against sibling projects by
/// name. Dependencies never leave the solution.
fn resolve_dependencies(model: &mut AuditModel, projects: &[ProjectIndex]) {
    for &project_index in projects {
        let references = model.projects[project_index.0].project_references.clone();
        let mut dependencies = Vec::new();
        for reference in references {
            if let Some(&sibling) = projects
                .iter()
                .find(|&&sibling| sibling != project_index && model.projects[sibling.0].name == reference)
            {
                dependencies.push(sibling);
            }
        }
        model.projects[project_index.0].dependencies = dependencies;
    }
}

/// Any non-test executable project? (Exempts the repository from the
/// `.gitignore` completeness checks.)
fn has_main_executable(model: &AuditModel, projects: &[ProjectIndex]) -> bool {
    projects.iter().any(|&index| {
        let project = &model.projects[index.0];
        let is_test = project.relative_path.starts_with("Test\\")
            || project.relative_path.starts_with("Test/");
        !is_test && project.output_type.is_executable()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NullableSetting, OutputType, ProjectFormat, SdkType};

    fn bare_project(name: &str, solution: SolutionIndex, path: &str, output: OutputType) -> Project {
        Project {
            solution,
            name: name.to_string(),
            guid: format!("{{{name}}}"),
            relative_path: path.to_string(),
            format: ProjectFormat::MsBuild,
            output_type: output,
            sdk_type: SdkType::Sdk,
            language_version: "9.0".into(),
            nullable: NullableSetting::Enable,
            neutral_language: "en-US".into(),
            editorconfig_linked: true,
            warnings_as_errors: true,
            package_references: Vec::new(),
            project_references: Vec::new(),
            dependencies: Vec::new(),
            valid: true,
        }
    }

    #[test]
    fn dependencies_resolve_by_name_within_the_solution() {
        let mut model = AuditModel::new();
        let solution = SolutionIndex(0);
        model.projects.push(bare_project("App", solution, "App/App.csproj", OutputType::Console));
        model.projects.push(bare_project("Core", solution, "Core/Core.csproj", OutputType::Library));
        model.projects[0].project_references = vec!["Core".into(), "Elsewhere".into()];

        let projects = vec![ProjectIndex(0), ProjectIndex(1)];
        resolve_dependencies(&mut model, &projects);

        assert_eq!(model.projects[0].dependencies, vec![ProjectIndex(1)]);
        assert!(model.projects[1].dependencies.is_empty());
    }

    #[test]
    fn test_projects_do_not_count_as_main_executables() {
        let mut model = AuditModel::new();
        let solution = SolutionIndex(0);
        model
            .projects
            .push(bare_project("TestApp", solution, r"Test\App\App.csproj", OutputType::Console));
        model.projects.push(bare_project("Core", solution, "Core/Core.csproj", OutputType::Library));

        assert!(!has_main_executable(&model, &[ProjectIndex(0), ProjectIndex(1)]));

        model.projects.push(bare_project("Cli", solution, "Cli/Cli.csproj", OutputType::Console));
        assert!(has_main_executable(&model, &[ProjectIndex(0), ProjectIndex(1), ProjectIndex(2)]));
    }
}
