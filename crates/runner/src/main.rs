use anyhow::{bail, Context, Result};
use bulkload_executor::ExecutorConfig;
use bulkload_runner::RunnerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bulkload_runner=info,bulkload_executor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        tracing::info!("Loaded .env from {:?}", path);
    }

    let executor_config = ExecutorConfig::from_env().context("Invalid executor configuration")?;
    let config = RunnerConfig::from_env().context("Invalid runner configuration")?;

    tracing::info!(
        max_in_flight = executor_config.max_in_flight,
        max_per_second = ?executor_config.max_per_second,
        fail_safe = executor_config.fail_safe,
        checkpoint = %config.checkpoint_path.display(),
        "bulkload starting..."
    );

    let summary = bulkload_runner::run(executor_config, &config).await?;

    tracing::info!(
        run_id = %summary.run_id,
        skipped = summary.skipped,
        completed = summary.completed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Load finished"
    );

    if let Some(error) = &summary.error {
        bail!("load terminated: {error}");
    }
    if summary.aborted {
        bail!("load aborted after {} failed records", summary.failed);
    }
    Ok(())
}
