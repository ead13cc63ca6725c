use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timerjobs::cli::{Cli, Command};
use timerjobs::config::Config;
use timerjobs::jobs::{JobResult, LandingsJob, ReconciliationJob, TelemetrySettings, Trigger};
use timerjobs::store::JsonFileSource;
use timerjobs::telemetry::TelemetryReporter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "timerjobs=debug"
    } else {
        "timerjobs=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(JobResult::Succeeded) => ExitCode::SUCCESS,
        Ok(JobResult::Failed { kind, reason }) => {
            error!(%kind, %reason, "job failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<JobResult> {
    let mut config = Config::load(cli.config.as_deref())?;
    let trigger = Trigger::new(cli.past_due, cli.invocation_id);
    let telemetry = TelemetrySettings::from_config(&config);
    let mut reporter = TelemetryReporter::new();

    let result = match cli.command {
        Command::Landings(args) => {
            args.apply(&mut config.landings);
            LandingsJob::new(config.landings, telemetry)
                .run(&trigger, &mut reporter)
                .await
        }
        Command::Reconcile(args) => {
            args.apply(&mut config.reconciliation);
            let source = JsonFileSource::new(&config.reconciliation.records_path);
            ReconciliationJob::new(config.reconciliation, telemetry, source)
                .run(&trigger, &mut reporter)
                .await
        }
    };

    reporter.flush().await;
    info!(invocation_id = %trigger.invocation_id, "run finished");
    Ok(result?)
}
