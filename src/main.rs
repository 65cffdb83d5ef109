use anyhow::Result;
use clap::Parser;
use repowarden::config::AuditConfig;
use repowarden::AuditService;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "repowarden",
    about = "GitHub repository compliance auditor",
    version
)]
struct Args {
    /// GitHub account whose repositories are audited
    #[arg(long, env = "REPOWARDEN_OWNER")]
    owner: Option<String>,

    /// GitHub personal access token
    #[arg(long, env = "REPOWARDEN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to config.toml (default: ./config.toml)
    #[arg(long, env = "REPOWARDEN_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "REPOWARDEN_LOG")]
    log: Option<String>,

    /// Run a single crawl + validate pass, print violations, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AuditConfig::new(args.config, args.owner, args.token, args.log)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log))
        .compact()
        .init();

    info!(owner = %config.owner, "starting repowarden");
    let service = AuditService::build(&config)?;

    if !service.run_pass().await? {
        warn!("rate-limit guard refused the initial connection, will retry on activity ticks");
    }
    report_violations(&service).await;

    if args.once {
        return Ok(());
    }

    let mut activity = service.subscribe().await;
    loop {
        tokio::select! {
            report = activity.recv() => {
                let Some(report) = report else { break };
                service.handle_activity(&report).await?;
                report_violations(&service).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    service.poller.unsubscribe().await;
    service.engine.crawler().stop().await;
    Ok(())
}

async fn report_violations(service: &AuditService) {
    let model = service.engine.crawler().model().read().await;
    if model.violations.is_empty() {
        info!(repositories = model.repositories.len(), "no violations");
        return;
    }
    for violation in &model.violations {
        warn!(violation = %violation.text(), "policy violation");
    }
}
