use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use esteira::cli::{Cli, Command};
use esteira::notify::DedupWindow;
use esteira::plan::Plan;
use esteira::ui::Report;
use esteira::{EngineConfig, InMemoryStore, StaticDirectory, WorkflowEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    esteira::telemetry::init(config.log_format, cli.verbose)
        .context("failed to initialize logging")?;

    let plan = match &cli.command {
        Command::Demo => Plan::demo(),
        Command::Run { plan } => Plan::load(plan)
            .with_context(|| format!("failed to load plan {}", plan.display()))?,
    };

    // Plan workers extend the configured directory; on a clash the plan wins.
    let mut workers = config.workers.clone();
    workers.retain(|w| !plan.workers.iter().any(|p| p.id == w.id));
    workers.extend(plan.workers.iter().cloned());

    let directory = StaticDirectory::new(workers);
    if directory.is_empty() {
        warn!("no workers configured, every stage will be rejected");
    }
    info!(workers = directory.len(), "directory loaded");

    let engine = WorkflowEngine::new(InMemoryStore::new(), directory, config.clone());
    let mut events = engine.subscribe();

    info!(actions = plan.actions.len(), "replaying plan");
    let (view, reports) = plan.replay(&engine).await?;
    // Picks up anything a failed flush left in the outbox.
    let leftover = engine.flush_events().await?;
    if leftover > 0 {
        warn!(leftover, "published events left behind by an earlier flush");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let report = Report::new();
    report.print_actions(&reports);
    println!();
    let mut window = DedupWindow::from_config(&config);
    while let Some(event) = events.try_next(engine.store()).await? {
        if window.admit(&event) {
            report.print_event(&event);
        }
    }
    if window.is_empty() {
        warn!("no events were published");
    }
    debug!(rendered = window.len(), last_sequence = events.last_seen(), "events drained");
    report.print_view(&view);
    Ok(())
}
