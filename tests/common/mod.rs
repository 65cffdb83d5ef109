//! In-memory GitHub for integration tests: repositories, branches, and file
//! contents are plain maps, mutable from the test body mid-flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use repowarden::crawler::RepositoryCrawler;
use repowarden::github::{
    ActivityPoller, CodeSearchItem, Connection, DownloadCache, GitHubApi, GitHubError, Quota,
    RateLimits, RemoteBranch, RemoteRepository, RemoteUser,
};
use repowarden::settings::MemorySettings;
use repowarden::solution::msbuild::MsBuildSolutionModel;
use repowarden::validate::{Policy, ValidationEngine};

#[derive(Default)]
pub struct FakeGitHub {
    repositories: Mutex<Vec<RemoteRepository>>,
    branches: Mutex<HashMap<String, Vec<RemoteBranch>>>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    /// Every raw-content request, hit or miss, in call order.
    pub raw_requests: Mutex<Vec<(String, String)>>,
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repository(&self, id: i64, name: &str, archived: bool) {
        self.repositories.lock().unwrap().push(RemoteRepository {
            id,
            name: name.to_string(),
            owner: "acme".to_string(),
            private: false,
            archived,
        });
    }

    pub fn set_branch(&self, repository: &str, branch: &str, sha: &str) {
        self.branches.lock().unwrap().insert(
            repository.to_string(),
            vec![RemoteBranch {
                name: branch.to_string(),
                commit_sha: sha.to_string(),
            }],
        );
    }

    pub fn put_file(&self, repository: &str, path: &str, content: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert((repository.to_string(), path.to_string()), content.into());
    }

    pub fn raw_request_count(&self, path_suffix: &str) -> usize {
        self.raw_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, path)| path.ends_with(path_suffix))
            .count()
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn user(&self, login: &str) -> Result<RemoteUser, GitHubError> {
        Ok(RemoteUser { login: login.to_string() })
    }

    async fn rate_limits(&self) -> Result<RateLimits, GitHubError> {
        Ok(RateLimits {
            core: Quota { remaining: 100, limit: 100 },
            search: Quota { remaining: 100, limit: 100 },
        })
    }

    async fn search_repositories(
        &self,
        _owner: &str,
        _updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRepository>, GitHubError> {
        Ok(self.repositories.lock().unwrap().clone())
    }

    async fn search_code(
        &self,
        _owner: &str,
        repo: &str,
        path: &str,
        filename: &str,
    ) -> Result<Vec<CodeSearchItem>, GitHubError> {
        let files = self.files.lock().unwrap();
        let hits = files
            .keys()
            .filter(|(repository, file_path)| {
                repository == repo
                    && file_path.ends_with(filename)
                    && (path != "/" || !file_path.contains('/'))
            })
            .map(|(_, file_path)| CodeSearchItem {
                name: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
                path: file_path.clone(),
            })
            .collect();
        Ok(hits)
    }

    async fn list_branches(&self, _owner: &str, repo: &str) -> Result<Vec<RemoteBranch>, GitHubError> {
        Ok(self.branches.lock().unwrap().get(repo).cloned().unwrap_or_default())
    }

    async fn raw_content(
        &self,
        _owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, GitHubError> {
        let trimmed = path.trim_start_matches('/').to_string();
        self.raw_requests
            .lock()
            .unwrap()
            .push((repo.to_string(), trimmed.clone()));
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&(repo.to_string(), trimmed))
            .cloned())
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Long interval so the poller timer never fires during a test.
pub const MANUAL: Duration = Duration::from_secs(3600);

pub fn engine(
    api: &Arc<FakeGitHub>,
    settings: &Arc<MemorySettings>,
    policy: Policy,
) -> ValidationEngine {
    let connection = Arc::new(Connection::new(
        Arc::clone(api) as Arc<dyn GitHubApi>,
        "acme",
    ));
    let cache = Arc::new(DownloadCache::new(Arc::clone(&connection)));
    let crawler = Arc::new(RepositoryCrawler::new(
        connection,
        cache,
        Arc::clone(settings) as Arc<dyn repowarden::settings::SettingsStore>,
        Arc::new(MsBuildSolutionModel::new()),
        "acme",
        3,
    ));
    let poller = Arc::new(ActivityPoller::new(
        Arc::clone(api) as Arc<dyn GitHubApi>,
        "acme",
        MANUAL,
    ));
    ValidationEngine::new(crawler, poller, policy)
}

// ── Repository content builders ───────────────────────────────────────────────

/// Solution text with one SDK-style project entry per (name, path) pair.
pub fn solution_text(projects: &[(&str, &str)]) -> String {
    let mut text = String::from("Microsoft Visual Studio Solution File, Format Version 12.00\n");
    for (position, (name, path)) in projects.iter().enumerate() {
        text.push_str(&format!(
            "Project(\"{{9A19103F-16F7-4668-BE54-9A1E7A4F7556}}\") = \"{name}\", \"{path}\", \"{{00000000-0000-0000-0000-{position:012}}}\"\nEndProject\n"
        ));
    }
    text
}

/// A project file satisfying every quality rule, with optional extra
/// `<PackageReference>` item lines.
pub fn compliant_csproj(package_items: &str) -> String {
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <LangVersion>9.0</LangVersion>
    <Nullable>enable</Nullable>
    <NeutralLanguage>en-US</NeutralLanguage>
    <TreatWarningsAsErrors>true</TreatWarningsAsErrors>
  </PropertyGroup>
  <ItemGroup>
    <None Include="..\.editorconfig" Link=".editorconfig" />
  </ItemGroup>
  <ItemGroup>
{package_items}
  </ItemGroup>
</Project>
"#
    )
}

/// Seed a repository holding one solution with the given projects.
pub fn seed_repository(
    api: &FakeGitHub,
    id: i64,
    name: &str,
    sha: &str,
    projects: &[(&str, &str, String)],
) {
    api.add_repository(id, name, false);
    api.set_branch(name, "master", sha);

    let entries: Vec<(&str, &str)> = projects
        .iter()
        .map(|(project, path, _)| (*project, *path))
        .collect();
    api.put_file(name, &format!("{name}.sln"), solution_text(&entries));

    for (_, path, content) in projects {
        api.put_file(name, &path.replace('\\', "/"), content.clone());
    }
}
