//! repowarden — GitHub repository compliance auditor.
//!
//! Crawls an account's repositories under a self-imposed rate-limit guard,
//! parses their solutions and projects into an audit model, validates the
//! model against a compliance policy, and keeps the verdicts current by
//! polling for repository activity in the background.

pub mod config;
pub mod crawler;
pub mod github;
pub mod model;
pub mod settings;
pub mod solution;
pub mod validate;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use config::AuditConfig;
use crawler::RepositoryCrawler;
use github::{ActivityPoller, ActivityReport, Connection, DownloadCache, GitHubClient};
use settings::JsonFileSettings;
use solution::msbuild::MsBuildSolutionModel;
use validate::ValidationEngine;

/// Fully wired audit service: crawler, poller, and validation engine sharing
/// one connection and model.
pub struct AuditService {
    pub engine: Arc<ValidationEngine>,
    pub poller: Arc<ActivityPoller>,
}

impl AuditService {
    /// Wire every component from the resolved configuration.
    pub fn build(config: &AuditConfig) -> Result<Self> {
        let client = match &config.api_base_url {
            Some(base_url) => {
                GitHubClient::with_base_url(&config.token, &config.application, base_url)?
            }
            None => GitHubClient::new(&config.token, &config.application)?,
        };
        let api = Arc::new(client);

        let connection = Arc::new(Connection::new(
            Arc::clone(&api) as Arc<dyn github::GitHubApi>,
            &config.owner,
        ));
        let cache = Arc::new(DownloadCache::new(Arc::clone(&connection)));
        let settings = Arc::new(JsonFileSettings::open(&config.settings_path));

        let crawler = Arc::new(RepositoryCrawler::new(
            connection,
            cache,
            settings,
            Arc::new(MsBuildSolutionModel::new()),
            &config.owner,
            config.crawl_batch,
        ));

        let poller = Arc::new(ActivityPoller::new(
            api as Arc<dyn github::GitHubApi>,
            &config.owner,
            config.polling,
        ));

        let policy = config.policy.build()?;
        let engine = Arc::new(ValidationEngine::new(crawler, Arc::clone(&poller), policy));

        Ok(Self { engine, poller })
    }

    /// One crawl + validate pass. Returns `false` when the rate-limit guard
    /// refused the connection this cycle.
    pub async fn run_pass(&self) -> Result<bool> {
        let crawler = self.engine.crawler();
        if !crawler.start().await? {
            return Ok(false);
        }
        self.engine.validate().await?;

        // Tell the poller which repositories exist so activity searches
        // become worthwhile.
        let ids: Vec<i64> = {
            let model = crawler.model().read().await;
            model.repositories.iter().map(|repository| repository.id).collect()
        };
        self.poller.set_repositories(ids);

        Ok(true)
    }

    /// Start background activity polling.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<ActivityReport> {
        self.poller.subscribe().await
    }

    /// Apply a detected-activity report and re-validate.
    pub async fn handle_activity(&self, report: &ActivityReport) -> Result<()> {
        self.engine.on_activity(report).await;
        self.run_pass().await?;
        Ok(())
    }
}
